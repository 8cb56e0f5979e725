use std::fmt;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use streamtap_frame::{FrameCodec, FrameError, CONTROL};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::{ListenerError, Result};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_STREAM_ID_LEN: usize = 256;
const MAX_SESSION_ID_LEN: usize = 128;
const MAX_AUTH_TOKEN_LEN: usize = 4096;

/// Client handshake request sent on CONTROL channel.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol name. Must be `streamtap` by default.
    pub protocol: String,
    /// Protocol version string.
    pub version: String,
    /// Stream the client wants to tail (application id, firehose name).
    pub stream_id: String,
    /// Optional authentication token provided by the client.
    /// Treated as opaque credential material and redacted in debug output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Server handshake response sent on CONTROL channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Protocol name. Must match request protocol.
    pub protocol: String,
    /// Negotiated protocol version.
    pub version: String,
    /// Opaque server-assigned session identifier.
    pub session_id: String,
}

/// Result of a successful handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Server-assigned session identifier.
    pub session_id: String,
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Stream requested by the client.
    pub stream_id: String,
    /// Client auth token observed by the server side.
    pub client_auth_token: Option<String>,
}

/// Configuration for handshake negotiation.
///
/// Deadlines are applied by the caller around the whole exchange.
#[derive(Clone)]
pub struct HandshakeConfig {
    /// Expected protocol name.
    pub protocol_name: String,
    /// Local protocol version.
    pub protocol_version: String,
    /// Maximum handshake frame payload size in bytes.
    pub max_handshake_payload: usize,
    /// Optional auth token sent by the client. Never logged.
    pub auth_token: Option<String>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_name: "streamtap".to_string(),
            protocol_version: "1.0".to_string(),
            max_handshake_payload: 16 * 1024,
            auth_token: None,
        }
    }
}

impl fmt::Debug for HandshakeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("HandshakeRequest");
        dbg.field("protocol", &self.protocol)
            .field("version", &self.version)
            .field("stream_id", &self.stream_id);
        redacted_field(&mut dbg, "auth_token", self.auth_token.as_deref());
        dbg.finish()
    }
}

impl fmt::Debug for HandshakeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("HandshakeResult");
        dbg.field("session_id", &self.session_id)
            .field("protocol_version", &self.protocol_version)
            .field("stream_id", &self.stream_id);
        redacted_field(&mut dbg, "client_auth_token", self.client_auth_token.as_deref());
        dbg.finish()
    }
}

impl fmt::Debug for HandshakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("HandshakeConfig");
        dbg.field("protocol_name", &self.protocol_name)
            .field("protocol_version", &self.protocol_version)
            .field("max_handshake_payload", &self.max_handshake_payload);
        redacted_field(&mut dbg, "auth_token", self.auth_token.as_deref());
        dbg.finish()
    }
}

fn redacted_field(dbg: &mut fmt::DebugStruct<'_, '_>, name: &str, token: Option<&str>) {
    match token {
        Some(token) => dbg.field(name, &format_args!("<redacted:{} bytes>", token.len())),
        None => dbg.field(name, &Option::<String>::None),
    };
}

/// Perform the client side of the handshake.
pub async fn handshake_client<T>(
    framed: &mut Framed<T, FrameCodec>,
    stream_id: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_stream_id(stream_id)?;
    validate_auth_token(config.auth_token.as_deref())?;

    let req = HandshakeRequest {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        stream_id: stream_id.to_string(),
        auth_token: config.auth_token.clone(),
    };
    send_control_json(framed, &req).await?;

    let payload = recv_control_payload(framed, config.max_handshake_payload).await?;
    let resp: HandshakeResponse = serde_json::from_slice(&payload)?;

    validate_protocol_name(&resp.protocol)?;
    validate_version(&resp.version)?;
    validate_session_id(&resp.session_id)?;

    if resp.protocol != config.protocol_name {
        return Err(ListenerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            resp.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&config.protocol_version, &resp.version)? {
        return Err(ListenerError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            resp.version, config.protocol_version
        )));
    }

    Ok(HandshakeResult {
        session_id: resp.session_id,
        protocol_version: resp.version,
        stream_id: stream_id.to_string(),
        client_auth_token: None,
    })
}

/// Perform the server side of the handshake.
///
/// On rejection nothing is sent back; the caller drops the connection and
/// the client observes a disconnect.
pub async fn handshake_server<T>(
    framed: &mut Framed<T, FrameCodec>,
    session_id: &str,
    config: &HandshakeConfig,
) -> Result<HandshakeResult>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    validate_protocol_name(&config.protocol_name)?;
    validate_version(&config.protocol_version)?;
    validate_session_id(session_id)?;

    let payload = recv_control_payload(framed, config.max_handshake_payload).await?;
    let req: HandshakeRequest = serde_json::from_slice(&payload)?;

    validate_protocol_name(&req.protocol)?;
    validate_version(&req.version)?;
    validate_stream_id(&req.stream_id)?;
    validate_auth_token(req.auth_token.as_deref())?;

    if req.protocol != config.protocol_name {
        return Err(ListenerError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            req.protocol, config.protocol_name
        )));
    }

    if !is_version_compatible(&req.version, &config.protocol_version)? {
        return Err(ListenerError::HandshakeFailed(format!(
            "incompatible version '{}' (server '{}')",
            req.version, config.protocol_version
        )));
    }

    let resp = HandshakeResponse {
        protocol: config.protocol_name.clone(),
        version: config.protocol_version.clone(),
        session_id: session_id.to_string(),
    };
    send_control_json(framed, &resp).await?;

    Ok(HandshakeResult {
        session_id: session_id.to_string(),
        protocol_version: config.protocol_version.clone(),
        stream_id: req.stream_id,
        client_auth_token: req.auth_token,
    })
}

async fn send_control_json<T, V>(framed: &mut Framed<T, FrameCodec>, value: &V) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
    V: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    framed
        .send(streamtap_frame::Frame::new(CONTROL, payload))
        .await?;
    Ok(())
}

async fn recv_control_payload<T>(
    framed: &mut Framed<T, FrameCodec>,
    max_handshake_payload: usize,
) -> Result<Vec<u8>>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(Ok(frame)) => {
            if frame.channel != CONTROL {
                return Err(ListenerError::HandshakeFailed(format!(
                    "expected CONTROL channel {}, got {}",
                    CONTROL, frame.channel
                )));
            }
            if frame.payload.len() > max_handshake_payload {
                return Err(ListenerError::HandshakeFailed(format!(
                    "handshake payload too large: {} (max {})",
                    frame.payload.len(),
                    max_handshake_payload
                )));
            }
            Ok(frame.payload.to_vec())
        }
        Some(Err(FrameError::PayloadTooLarge { size, max })) => Err(
            ListenerError::HandshakeFailed(format!("handshake payload too large: {size} (max {max})")),
        ),
        Some(Err(FrameError::Truncated { .. })) | None => Err(ListenerError::Disconnected(
            "connection closed during handshake".to_string(),
        )),
        Some(Err(err)) => Err(ListenerError::Frame(err)),
    }
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(ListenerError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(ListenerError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

fn validate_stream_id(stream_id: &str) -> Result<()> {
    if stream_id.is_empty() || stream_id.len() > MAX_STREAM_ID_LEN {
        return Err(ListenerError::HandshakeFailed(format!(
            "invalid stream_id length: {}",
            stream_id.len()
        )));
    }
    Ok(())
}

fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(ListenerError::HandshakeFailed(format!(
            "invalid session_id length: {}",
            session_id.len()
        )));
    }
    Ok(())
}

fn validate_auth_token(auth_token: Option<&str>) -> Result<()> {
    if let Some(token) = auth_token {
        if token.is_empty() || token.len() > MAX_AUTH_TOKEN_LEN {
            return Err(ListenerError::HandshakeFailed(format!(
                "invalid auth_token length: {}",
                token.len()
            )));
        }
    }
    Ok(())
}

fn is_version_compatible(client_version: &str, server_version: &str) -> Result<bool> {
    let (client_major, client_minor) = parse_version(client_version)?;
    let (server_major, server_minor) = parse_version(server_version)?;

    Ok(client_major == server_major && client_minor >= server_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |why: &str| {
        ListenerError::HandshakeFailed(format!("invalid version '{version}': {why}"))
    };

    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(|| invalid("missing major"))?;
    let minor = parts.next().ok_or_else(|| invalid("missing minor"))?;
    if parts.next().is_some() {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric major"))?;
    let minor = minor
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric minor"))?;

    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use streamtap_frame::{Frame, DATA};
    use tokio::io::DuplexStream;

    use super::*;

    fn framed_pair() -> (
        Framed<DuplexStream, FrameCodec>,
        Framed<DuplexStream, FrameCodec>,
    ) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        (
            Framed::new(left, FrameCodec::new()),
            Framed::new(right, FrameCodec::new()),
        )
    }

    #[tokio::test]
    async fn successful_handshake() {
        let (mut server_side, mut client_side) = framed_pair();

        let server = tokio::spawn(async move {
            handshake_server(&mut server_side, "session-1", &HandshakeConfig::default()).await
        });

        let client_result =
            handshake_client(&mut client_side, "myApp", &HandshakeConfig::default())
                .await
                .unwrap();
        let server_result = server.await.unwrap().unwrap();

        assert_eq!(client_result.session_id, "session-1");
        assert_eq!(client_result.protocol_version, "1.0");
        assert_eq!(client_result.stream_id, "myApp");
        assert!(client_result.client_auth_token.is_none());
        assert_eq!(server_result.stream_id, "myApp");
        assert!(server_result.client_auth_token.is_none());
    }

    #[tokio::test]
    async fn wrong_protocol_name_rejected() {
        let (mut server_side, mut client_side) = framed_pair();

        let server = tokio::spawn(async move {
            let result =
                handshake_server(&mut server_side, "session-2", &HandshakeConfig::default()).await;
            drop(server_side);
            result
        });

        let cfg = HandshakeConfig {
            protocol_name: "foobar".to_string(),
            ..HandshakeConfig::default()
        };
        let client_result = handshake_client(&mut client_side, "myApp", &cfg).await;

        assert!(matches!(client_result, Err(ListenerError::Disconnected(_))));
        assert!(matches!(
            server.await.unwrap(),
            Err(ListenerError::HandshakeFailed(_))
        ));
    }

    #[tokio::test]
    async fn version_mismatch() {
        let (mut server_side, mut client_side) = framed_pair();

        let server = tokio::spawn(async move {
            let cfg = HandshakeConfig {
                protocol_version: "2.0".to_string(),
                ..HandshakeConfig::default()
            };
            let result = handshake_server(&mut server_side, "session-3", &cfg).await;
            drop(server_side);
            result
        });

        let result = handshake_client(&mut client_side, "myApp", &HandshakeConfig::default()).await;

        assert!(matches!(result, Err(ListenerError::Disconnected(_))));
        assert!(matches!(
            server.await.unwrap(),
            Err(ListenerError::HandshakeFailed(_))
        ));
    }

    #[tokio::test]
    async fn invalid_json_rejected() {
        let (mut server_side, mut client_side) = framed_pair();
        client_side
            .send(Frame::new(CONTROL, b"{not-json".to_vec()))
            .await
            .unwrap();

        let result =
            handshake_server(&mut server_side, "session-4", &HandshakeConfig::default()).await;
        assert!(matches!(result, Err(ListenerError::Json(_))));
    }

    #[tokio::test]
    async fn data_frame_before_response_rejected() {
        let (mut server_side, mut client_side) = framed_pair();

        let server = tokio::spawn(async move {
            let _ = server_side.next().await;
            server_side
                .send(Frame::new(DATA, b"too early".to_vec()))
                .await
                .unwrap();
            server_side
        });

        let result = handshake_client(&mut client_side, "myApp", &HandshakeConfig::default()).await;
        assert!(matches!(result, Err(ListenerError::HandshakeFailed(_))));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn rejects_empty_stream_id() {
        let (_server_side, mut client_side) = framed_pair();
        let result = handshake_client(&mut client_side, "", &HandshakeConfig::default()).await;
        assert!(matches!(result, Err(ListenerError::HandshakeFailed(_))));
    }

    #[tokio::test]
    async fn auth_token_passthrough() {
        let (mut server_side, mut client_side) = framed_pair();

        let server = tokio::spawn(async move {
            handshake_server(&mut server_side, "session-auth", &HandshakeConfig::default()).await
        });

        let cfg = HandshakeConfig {
            auth_token: Some("token-123".to_string()),
            ..HandshakeConfig::default()
        };
        let client_result = handshake_client(&mut client_side, "myApp", &cfg)
            .await
            .unwrap();
        let server_result = server.await.unwrap().unwrap();

        assert!(client_result.client_auth_token.is_none());
        assert_eq!(
            server_result.client_auth_token.as_deref(),
            Some("token-123")
        );
    }

    #[tokio::test]
    async fn rejects_oversized_handshake_payload() {
        let (mut server_side, mut client_side) = framed_pair();

        let server = tokio::spawn(async move {
            let cfg = HandshakeConfig {
                max_handshake_payload: 64,
                ..HandshakeConfig::default()
            };
            let result = handshake_server(&mut server_side, "session-limit", &cfg).await;
            drop(server_side);
            result
        });

        let cfg = HandshakeConfig {
            auth_token: Some("a".repeat(256)),
            ..HandshakeConfig::default()
        };
        let result = handshake_client(&mut client_side, "myApp", &cfg).await;
        assert!(matches!(result, Err(ListenerError::Disconnected(_))));
        assert!(matches!(
            server.await.unwrap(),
            Err(ListenerError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn version_compatibility_rules() {
        assert!(is_version_compatible("1.2", "1.0").unwrap());
        assert!(!is_version_compatible("1.0", "1.2").unwrap());
        assert!(!is_version_compatible("2.0", "1.0").unwrap());
        assert!(parse_version("1").is_err());
        assert!(parse_version("1.x").is_err());
        assert!(parse_version("1.0.0").is_err());
    }

    #[test]
    fn debug_output_redacts_auth_token() {
        let request = HandshakeRequest {
            protocol: "streamtap".to_string(),
            version: "1.0".to_string(),
            stream_id: "myApp".to_string(),
            auth_token: Some("super-secret".to_string()),
        };
        let request_debug = format!("{request:?}");
        assert!(request_debug.contains("<redacted:12 bytes>"));
        assert!(!request_debug.contains("super-secret"));

        let config = HandshakeConfig {
            auth_token: Some("another-secret".to_string()),
            ..HandshakeConfig::default()
        };
        let config_debug = format!("{config:?}");
        assert!(config_debug.contains("<redacted:14 bytes>"));
        assert!(!config_debug.contains("another-secret"));

        let result = HandshakeResult {
            session_id: "session-1".to_string(),
            protocol_version: "1.0".to_string(),
            stream_id: "myApp".to_string(),
            client_auth_token: Some("token-123".to_string()),
        };
        let result_debug = format!("{result:?}");
        assert!(result_debug.contains("<redacted:9 bytes>"));
        assert!(!result_debug.contains("token-123"));
    }
}

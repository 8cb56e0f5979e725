use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use streamtap_frame::{Frame, FrameCodec, FrameError, DATA, DEFAULT_MAX_PAYLOAD};
use streamtap_transport::{Endpoint, TapListener, TapStream};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::Framed;
use tracing::{debug, info};

use crate::control::ControlMessage;
use crate::error::{ListenerError, Result};
use crate::handshake::{handshake_server, HandshakeConfig, HandshakeResult};

/// Server side of the streaming protocol.
///
/// Accepts listener connections and hands back an [`UpstreamSession`] per
/// client once the handshake succeeded.
pub struct UpstreamListener {
    listener: TapListener,
    handshake_config: HandshakeConfig,
    handshake_timeout: Duration,
    next_session_id: AtomicU64,
}

impl UpstreamListener {
    /// Bind to an address (`tcp://host:port`, `host:port` or `unix:///path`).
    pub async fn bind(address: &str) -> Result<Self> {
        let endpoint = Endpoint::parse(address)?;
        let listener = TapListener::bind(&endpoint).await?;
        Ok(Self {
            listener,
            handshake_config: HandshakeConfig::default(),
            handshake_timeout: Duration::from_secs(5),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Override handshake config.
    pub fn with_handshake_config(mut self, config: HandshakeConfig) -> Self {
        self.handshake_config = config;
        self
    }

    /// Bound on reading the client request. Zero waits forever.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Resolved local endpoint; reports the real port when bound to port 0.
    pub fn local_endpoint(&self) -> &Endpoint {
        self.listener.local_endpoint()
    }

    /// Accept the next client and run the server handshake.
    pub async fn accept(&self) -> Result<UpstreamSession> {
        let stream = self.listener.accept().await?;
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let session_id = format!("session-{id}");

        let codec = FrameCodec::with_max_payload(self.handshake_config.max_handshake_payload);
        let mut framed = Framed::new(stream, codec);

        let exchange = handshake_server(&mut framed, &session_id, &self.handshake_config);
        let handshake = if self.handshake_timeout.is_zero() {
            exchange.await?
        } else {
            tokio::time::timeout(self.handshake_timeout, exchange)
                .await
                .map_err(|_| ListenerError::HandshakeTimeout(self.handshake_timeout))??
        };
        framed.codec_mut().set_max_payload_size(DEFAULT_MAX_PAYLOAD);

        info!(
            %session_id,
            stream_id = %handshake.stream_id,
            "accepted stream listener"
        );
        Ok(UpstreamSession { framed, handshake })
    }
}

/// One accepted listener connection, seen from the upstream side.
pub struct UpstreamSession {
    framed: Framed<TapStream, FrameCodec>,
    handshake: HandshakeResult,
}

impl UpstreamSession {
    /// Stream the client asked for.
    pub fn stream_id(&self) -> &str {
        &self.handshake.stream_id
    }

    pub fn handshake_result(&self) -> &HandshakeResult {
        &self.handshake
    }

    /// Send one DATA frame.
    pub async fn send(&mut self, payload: impl Into<Bytes>) -> Result<()> {
        self.framed.send(Frame::new(DATA, payload)).await?;
        Ok(())
    }

    pub async fn send_control(&mut self, msg: &ControlMessage) -> Result<()> {
        self.framed.send(msg.to_frame()?).await?;
        Ok(())
    }

    /// Send a frame on any channel.
    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.framed.send(frame).await?;
        Ok(())
    }

    /// Write bytes straight to the socket, bypassing the frame encoder.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.framed.flush().await?;
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.map_err(FrameError::from)?;
        stream.flush().await.map_err(FrameError::from)?;
        Ok(())
    }

    /// Next frame from the client, or `None` once it hung up.
    pub async fn recv(&mut self) -> Option<Result<Frame>> {
        self.framed
            .next()
            .await
            .map(|frame| frame.map_err(ListenerError::from))
    }

    /// Orderly end of stream: send a CONTROL close frame, then shut down.
    pub async fn close(mut self, reason: Option<&str>) -> Result<()> {
        self.framed
            .send(ControlMessage::close(reason).to_frame()?)
            .await?;
        self.framed.close().await?;
        debug!(session_id = %self.handshake.session_id, "closed session");
        Ok(())
    }

    /// Drop the connection without a close frame.
    pub fn abort(self) {
        debug!(session_id = %self.handshake.session_id, "aborting session");
    }
}

impl std::fmt::Debug for UpstreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSession")
            .field("handshake", &self.handshake)
            .field("stream", self.framed.get_ref())
            .finish()
    }
}

use std::time::Duration;

use crate::converter::ConvertError;

/// Errors that can occur while listening to an upstream server.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Transport-level error (bad address, refused connection).
    #[error("transport error: {0}")]
    Transport(#[from] streamtap_transport::TransportError),

    /// Frame-level error during the handshake.
    #[error("frame error: {0}")]
    Frame(#[from] streamtap_frame::FrameError),

    /// Handshake rejected or malformed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Connect + handshake exceeded the configured deadline.
    #[error("handshake i/o timeout after {}", humantime::format_duration(*.0))]
    HandshakeTimeout(Duration),

    /// Peer went away before the handshake completed.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No frame arrived within the read-idle timeout.
    #[error("timed out listening to upstream after {}", humantime::format_duration(*.0))]
    IdleTimeout(Duration),

    /// The upstream connection broke without an orderly close.
    #[error("upstream connection failed: {0}")]
    RemoteFailure(String),

    /// The injected frame converter rejected a frame.
    #[error("frame converter failed: {0}")]
    Convert(#[source] ConvertError),

    /// The diagnostic envelope could not be encoded.
    #[error("failed to encode diagnostic envelope: {0}")]
    Encode(#[from] streamtap_envelope::EnvelopeError),

    /// The receiving side of the output channel was dropped.
    #[error("output channel closed by receiver")]
    OutputClosed,
}

impl ListenerError {
    /// True when no stream was ever established.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            ListenerError::Transport(_)
                | ListenerError::Frame(_)
                | ListenerError::HandshakeFailed(_)
                | ListenerError::HandshakeTimeout(_)
                | ListenerError::Disconnected(_)
                | ListenerError::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ListenerError>;

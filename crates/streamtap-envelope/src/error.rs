/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// A required field was empty.
    #[error("envelope field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope decoded but does not carry a log message.
    #[error("envelope has event type {0:?}, expected LogMessage")]
    NotLogMessage(crate::envelope::EventType),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;

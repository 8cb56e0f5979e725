use bytes::Bytes;

use crate::envelope::Envelope;
use crate::error::Result;

/// Encodes a diagnostic line into wire-format envelope bytes.
///
/// Implemented for closures so callers can inject alternative encodings.
pub trait EnvelopeEncoder: Send + Sync {
    fn encode(&self, source_type: &str, message: &str, stream_id: &str) -> Result<Bytes>;
}

impl<F> EnvelopeEncoder for F
where
    F: Fn(&str, &str, &str) -> Result<Bytes> + Send + Sync,
{
    fn encode(&self, source_type: &str, message: &str, stream_id: &str) -> Result<Bytes> {
        self(source_type, message, stream_id)
    }
}

/// Default encoder: an `ERR` log message wrapped in a JSON envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEnvelopeEncoder;

impl EnvelopeEncoder for LogEnvelopeEncoder {
    fn encode(&self, source_type: &str, message: &str, stream_id: &str) -> Result<Bytes> {
        let envelope = Envelope::error_log(source_type, message, stream_id)?;
        Ok(Bytes::from(envelope.to_bytes()?))
    }
}

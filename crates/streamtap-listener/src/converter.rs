use bytes::Bytes;

/// Error type returned by frame converters.
pub type ConvertError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Per-frame transform applied before forwarding.
///
/// `Ok(Some(bytes))` forwards, `Ok(None)` drops the frame, `Err(_)` ends the
/// listener call with that error.
pub trait FrameConverter: Send + Sync {
    fn convert(&self, frame: Bytes) -> Result<Option<Bytes>, ConvertError>;
}

impl<F> FrameConverter for F
where
    F: Fn(Bytes) -> Result<Option<Bytes>, ConvertError> + Send + Sync,
{
    fn convert(&self, frame: Bytes) -> Result<Option<Bytes>, ConvertError> {
        self(frame)
    }
}

/// Forwards every frame unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl FrameConverter for Passthrough {
    fn convert(&self, frame: Bytes) -> Result<Option<Bytes>, ConvertError> {
        Ok(Some(frame))
    }
}

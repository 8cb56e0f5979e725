//! Log envelope encoding.
//!
//! Turns a (source type, message, stream id) triple into the wire bytes a
//! downstream log consumer understands, and back.

pub mod encoder;
pub mod envelope;
pub mod error;

pub use encoder::{EnvelopeEncoder, LogEnvelopeEncoder};
pub use envelope::{decode_envelope, Envelope, EventType, LogMessage, MessageType, DEFAULT_ORIGIN};
pub use error::{EnvelopeError, Result};

//! Length-prefixed frame codec with channel multiplexing.
//!
//! Every frame on the wire carries:
//! - A 2-byte magic number ("ST") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian channel ID for multiplexing
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::{FramedRead, FramedWrite}`
//! and tells a clean end-of-stream apart from a truncated frame.

pub mod channel;
pub mod codec;
pub mod error;

pub use channel::{channel_name, CONTROL, DATA};
pub use codec::{
    decode_frame, encode_frame, Frame, FrameCodec, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC,
};
pub use error::{FrameError, Result};

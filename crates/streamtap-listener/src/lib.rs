//! Streaming listener for upstream log servers.
//!
//! Connects out to an upstream server, performs the handshake, forwards
//! every converted DATA frame to a caller-owned channel, and reports why the
//! stream ended. Exactly one connection attempt per [`StreamListener::start`]
//! call; reconnect policy belongs to the caller.

pub mod control;
mod connection;
pub mod converter;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod upstream;

pub use control::{ControlMessage, CONTROL_CLOSE, CONTROL_PING, CONTROL_PONG};
pub use converter::{ConvertError, FrameConverter, Passthrough};
pub use error::{ListenerError, Result};
pub use handshake::{
    handshake_client, handshake_server, HandshakeConfig, HandshakeRequest, HandshakeResponse,
    HandshakeResult,
};
pub use listener::{StreamListener, DEFAULT_SOURCE_TYPE};
pub use upstream::{UpstreamListener, UpstreamSession};

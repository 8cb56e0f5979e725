//! Socket transport for streamtap.
//!
//! Provides a unified interface over the stream sockets an upstream server
//! can be reached on:
//! - TCP (`tcp://host:port` or bare `host:port`)
//! - Unix domain sockets (`unix:///path/to.sock`, Unix only)
//!
//! This is the lowest layer of streamtap. Everything else builds on top of
//! the [`TapStream`] type provided here.

pub mod address;
pub mod error;
pub mod listener;
pub mod stream;

pub use address::Endpoint;
pub use error::{Result, TransportError};
pub use listener::TapListener;
pub use stream::{connect, TapStream};

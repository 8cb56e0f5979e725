//! Streaming listener for log traffic controllers.
//!
//! streamtap pulls live log frames from an upstream streaming server,
//! forwards them to a local consumer and reports why a stream ended.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and Unix socket connect/accept
//! - [`frame`]: length-prefixed framing with channel multiplexing
//! - [`envelope`]: diagnostic envelope encoding
//! - [`config`]: traffic-controller settings
//! - [`listener`]: the stream listener and an upstream harness

/// Re-export transport types.
pub mod transport {
    pub use streamtap_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use streamtap_frame::*;
}

/// Re-export envelope types.
pub mod envelope {
    pub use streamtap_envelope::*;
}

/// Re-export settings types.
pub mod config {
    pub use streamtap_config::*;
}

/// Re-export listener types.
pub mod listener {
    pub use streamtap_listener::*;
}

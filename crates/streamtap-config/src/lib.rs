//! Traffic-controller settings.
//!
//! A flat JSON document with defaults for everything but the outgoing port.
//! The listener never parses settings itself; it takes the resolved timeout
//! values from [`Settings`].

pub mod error;
pub mod settings;

pub use error::{ConfigError, Result};
pub use settings::{
    Settings, DEFAULT_ETCD_MAX_CONCURRENT_REQUESTS, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_JOB_NAME,
    DEFAULT_MONITOR_INTERVAL_SECONDS,
};

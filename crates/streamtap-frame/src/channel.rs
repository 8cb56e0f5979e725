//! Channel IDs.
//!
//! Channel 0 carries the handshake and control messages; everything the
//! upstream streams to the listener travels on channel 1.

/// Connection management (handshake, ping/pong, close).
pub const CONTROL: u16 = 0;

/// Streamed log/metric payloads.
pub const DATA: u16 = 1;

/// Returns a human-readable name for a channel ID.
pub fn channel_name(id: u16) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        DATA => "DATA",
        _ => "UNKNOWN",
    }
}

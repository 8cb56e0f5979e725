use serde::{Deserialize, Serialize};
use streamtap_frame::{Frame, CONTROL};

use crate::error::{ListenerError, Result};

/// CONTROL message type: orderly end of stream.
pub const CONTROL_CLOSE: &str = "close";
/// CONTROL message type: ping request.
pub const CONTROL_PING: &str = "ping";
/// CONTROL message type: ping response.
pub const CONTROL_PONG: &str = "pong";

/// CONTROL channel message: `{"type": .., "reason"?: ..}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ControlMessage {
    /// Create a close message.
    pub fn close(reason: Option<&str>) -> Self {
        Self {
            msg_type: CONTROL_CLOSE.to_string(),
            reason: reason.map(str::to_string),
        }
    }

    /// Create a ping message.
    pub fn ping() -> Self {
        Self {
            msg_type: CONTROL_PING.to_string(),
            reason: None,
        }
    }

    /// Create a pong message.
    pub fn pong() -> Self {
        Self {
            msg_type: CONTROL_PONG.to_string(),
            reason: None,
        }
    }

    /// Close reason, if one was given.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Encode as a CONTROL frame.
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(Frame::new(CONTROL, serde_json::to_vec(self)?))
    }

    /// Decode from a CONTROL frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.channel != CONTROL {
            return Err(ListenerError::HandshakeFailed(format!(
                "expected CONTROL channel {}, got {}",
                CONTROL, frame.channel
            )));
        }
        Ok(serde_json::from_slice(&frame.payload)?)
    }
}

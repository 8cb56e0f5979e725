use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, Result};

/// Origin stamped on envelopes the listener synthesizes.
pub const DEFAULT_ORIGIN: &str = "doppler";

/// Kind of event carried by an envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    LogMessage,
    Heartbeat,
    Error,
}

/// Stream a log line was written to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Out,
    Err,
}

/// A single log line attributed to a stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    pub message: String,
    pub message_type: MessageType,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub app_id: String,
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_instance: Option<String>,
}

/// Wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub origin: String,
    pub event_type: EventType,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<LogMessage>,
}

impl Envelope {
    /// Build an `ERR` log envelope stamped with the current time.
    pub fn error_log(source_type: &str, message: &str, app_id: &str) -> Result<Self> {
        if source_type.is_empty() {
            return Err(EnvelopeError::EmptyField("sourceType"));
        }
        let timestamp = now_unix_nanos();
        Ok(Self {
            origin: DEFAULT_ORIGIN.to_string(),
            event_type: EventType::LogMessage,
            timestamp,
            log_message: Some(LogMessage {
                message: message.to_string(),
                message_type: MessageType::Err,
                timestamp,
                app_id: app_id.to_string(),
                source_type: source_type.to_string(),
                source_instance: None,
            }),
        })
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// The carried log message, or an error if this is another event type.
    pub fn into_log_message(self) -> Result<LogMessage> {
        match self.log_message {
            Some(log) if self.event_type == EventType::LogMessage => Ok(log),
            _ => Err(EnvelopeError::NotLogMessage(self.event_type)),
        }
    }
}

/// Parse wire bytes back into an envelope.
pub fn decode_envelope(data: &[u8]) -> Result<Envelope> {
    Ok(serde_json::from_slice(data)?)
}

fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_populates_log_message() {
        let envelope = Envelope::error_log("DOP", "boom", "app-1").unwrap();
        assert_eq!(envelope.origin, DEFAULT_ORIGIN);
        assert_eq!(envelope.event_type, EventType::LogMessage);

        let log = envelope.into_log_message().unwrap();
        assert_eq!(log.source_type, "DOP");
        assert_eq!(log.message, "boom");
        assert_eq!(log.app_id, "app-1");
        assert_eq!(log.message_type, MessageType::Err);
        assert!(log.timestamp > 0);
    }

    #[test]
    fn wire_format_uses_camel_case_keys() {
        let bytes = Envelope::error_log("DOP", "boom", "app-1")
            .unwrap()
            .to_bytes()
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["eventType"], "LogMessage");
        assert_eq!(value["logMessage"]["sourceType"], "DOP");
        assert_eq!(value["logMessage"]["messageType"], "ERR");
        assert_eq!(value["logMessage"]["appId"], "app-1");
        assert!(value["logMessage"].get("sourceInstance").is_none());
    }

    #[test]
    fn rejects_empty_source_type() {
        assert!(matches!(
            Envelope::error_log("", "boom", "app-1"),
            Err(EnvelopeError::EmptyField("sourceType"))
        ));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_envelope(b"hello world"),
            Err(EnvelopeError::Json(_))
        ));
    }

    #[test]
    fn decodes_upstream_stdout_line() {
        let wire = br#"{"origin":"router","eventType":"LogMessage","timestamp":7,
            "logMessage":{"message":"GET /","messageType":"OUT","timestamp":7,
            "appId":"app-1","sourceType":"RTR","sourceInstance":"0"}}"#;
        let log = decode_envelope(wire).unwrap().into_log_message().unwrap();
        assert_eq!(log.message_type, MessageType::Out);
        assert_eq!(log.source_instance.as_deref(), Some("0"));
    }

    #[test]
    fn error_event_is_not_a_log_message() {
        let envelope =
            decode_envelope(br#"{"origin":"doppler","eventType":"Error","timestamp":1}"#).unwrap();
        assert_eq!(envelope.event_type, EventType::Error);
        assert!(matches!(
            envelope.into_log_message(),
            Err(EnvelopeError::NotLogMessage(EventType::Error))
        ));
    }

    #[test]
    fn heartbeat_is_not_a_log_message() {
        let envelope = Envelope {
            origin: DEFAULT_ORIGIN.to_string(),
            event_type: EventType::Heartbeat,
            timestamp: 1,
            log_message: None,
        };
        assert!(matches!(
            envelope.into_log_message(),
            Err(EnvelopeError::NotLogMessage(EventType::Heartbeat))
        ));
    }
}

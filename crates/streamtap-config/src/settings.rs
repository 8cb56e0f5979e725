use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};

/// Default job name when none is configured.
pub const DEFAULT_JOB_NAME: &str = "loggregator_trafficcontroller";
/// Default cap on in-flight coordination-service requests.
pub const DEFAULT_ETCD_MAX_CONCURRENT_REQUESTS: i32 = 10;
/// Default health monitoring interval.
pub const DEFAULT_MONITOR_INTERVAL_SECONDS: u32 = 60;
/// Default bound on connect + handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Traffic-controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    /// Port the traffic controller serves dropsonde streams on.
    pub outgoing_dropsonde_port: u32,
    #[serde(default = "default_job_name")]
    pub job_name: String,
    #[serde(default)]
    pub job_index: i32,
    #[serde(default = "default_etcd_max_concurrent_requests")]
    pub etcd_max_concurrent_requests: i32,
    #[serde(default)]
    pub etcd_urls: Vec<String>,
    #[serde(default = "default_monitor_interval_seconds")]
    pub monitor_interval_seconds: u32,
    /// Empty disables security event logging.
    #[serde(default)]
    pub security_event_log: String,
    /// Read-idle timeout handed to the stream listener; 0 waits forever.
    #[serde(default)]
    pub read_timeout_milliseconds: u64,
    /// Handshake timeout handed to the stream listener; 0 waits forever.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_milliseconds: u64,
}

fn default_job_name() -> String {
    DEFAULT_JOB_NAME.to_string()
}

fn default_etcd_max_concurrent_requests() -> i32 {
    DEFAULT_ETCD_MAX_CONCURRENT_REQUESTS
}

fn default_monitor_interval_seconds() -> u32 {
    DEFAULT_MONITOR_INTERVAL_SECONDS
}

fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

impl Settings {
    /// Parse and validate a settings document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json_str(&raw)?;
        debug!(?path, job = %settings.job_name, index = settings.job_index, "loaded settings");
        Ok(settings)
    }

    /// Check value ranges serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.outgoing_dropsonde_port == 0 || self.outgoing_dropsonde_port > u16::MAX as u32 {
            return Err(ConfigError::Invalid {
                field: "OutgoingDropsondePort",
                reason: format!("{} is not a valid port", self.outgoing_dropsonde_port),
            });
        }
        if self.etcd_max_concurrent_requests < 1 {
            return Err(ConfigError::Invalid {
                field: "EtcdMaxConcurrentRequests",
                reason: format!("must be at least 1, got {}", self.etcd_max_concurrent_requests),
            });
        }
        if self.monitor_interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "MonitorIntervalSeconds",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(pos) = self.etcd_urls.iter().position(|url| url.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "EtcdUrls",
                reason: format!("entry {pos} is empty"),
            });
        }
        Ok(())
    }

    /// Read-idle timeout for the stream listener.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_milliseconds)
    }

    /// Handshake timeout for the stream listener.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_milliseconds)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;

    fn testdata(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("testdata")
            .join(name)
    }

    #[test]
    fn reads_outgoing_port() {
        let settings = Settings::load(testdata("minimal_trafficcontroller.json")).unwrap();
        assert_eq!(settings.outgoing_dropsonde_port, 4566u32);
    }

    #[test]
    fn minimal_file_uses_defaults() {
        let settings = Settings::load(testdata("minimal_trafficcontroller.json")).unwrap();

        assert_eq!(settings.job_name, "loggregator_trafficcontroller");
        assert_eq!(settings.job_index, 0);
        assert_eq!(settings.etcd_max_concurrent_requests, 10);
        assert!(settings.etcd_urls.is_empty());
        assert_eq!(settings.monitor_interval_seconds, 60u32);
        assert_eq!(settings.security_event_log, "");
        assert_eq!(settings.read_timeout(), Duration::ZERO);
        assert_eq!(settings.handshake_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn full_file_uses_specified_properties() {
        let settings = Settings::load(testdata("trafficcontroller.json")).unwrap();

        assert_eq!(settings.job_name, "trafficcontroller");
        assert_eq!(settings.job_index, 3);
        assert_eq!(settings.etcd_max_concurrent_requests, 5);
        assert_eq!(
            settings.etcd_urls,
            vec!["http://127.0.0.1:4001", "http://127.0.0.1:4002"]
        );
        assert_eq!(settings.monitor_interval_seconds, 60u32);
        assert_eq!(settings.security_event_log, "access.log");
        assert_eq!(settings.read_timeout(), Duration::from_millis(500));
        assert_eq!(settings.handshake_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn missing_port_is_rejected() {
        let err = Settings::from_json_str(r#"{"JobName":"tc"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = Settings::from_json_str(r#"{"OutgoingDropsondePort":70000}"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "OutgoingDropsondePort",
                ..
            }
        ));

        let err = Settings::from_json_str(
            r#"{"OutgoingDropsondePort":4566,"EtcdMaxConcurrentRequests":0}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "EtcdMaxConcurrentRequests",
                ..
            }
        ));

        let err =
            Settings::from_json_str(r#"{"OutgoingDropsondePort":4566,"EtcdUrls":["http://a",""]}"#)
                .unwrap_err();
        assert!(err.to_string().contains("entry 1 is empty"));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_from_ad_hoc_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"OutgoingDropsondePort":8081,"MonitorIntervalSeconds":15}}"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.outgoing_dropsonde_port, 8081);
        assert_eq!(settings.monitor_interval_seconds, 15);
    }
}

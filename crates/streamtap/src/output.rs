use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use streamtap_config::Settings;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    stream_id: &'a str,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_frame(payload: &[u8], stream_id: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                stream_id,
                payload_size: payload.len(),
                payload: payload_preview(payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["STREAM", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    stream_id.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "stream={} size={} payload={}",
                stream_id,
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(payload);
            print_raw(b"\n");
        }
    }
}

#[derive(Serialize)]
struct ListeningOutput<'a> {
    event: &'static str,
    endpoint: &'a str,
}

/// Announce the bound endpoint so scripts can connect to it.
pub fn print_listening(endpoint: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ListeningOutput {
                event: "listening",
                endpoint,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => println!("listening on {endpoint}"),
        OutputFormat::Raw => println!("{endpoint}"),
    }
    let _ = std::io::stdout().flush();
}

pub fn print_settings(settings: &Settings, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(settings).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SETTING", "VALUE"]);
            for (key, value) in settings_rows(settings) {
                table.add_row(vec![key.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Settings:");
            for (key, value) in settings_rows(settings) {
                println!("  {key:<30} {value}");
            }
        }
        OutputFormat::Raw => {
            for (key, value) in settings_rows(settings) {
                println!("{key}={value}");
            }
        }
    }
}

fn settings_rows(settings: &Settings) -> Vec<(&'static str, String)> {
    vec![
        (
            "OutgoingDropsondePort",
            settings.outgoing_dropsonde_port.to_string(),
        ),
        ("JobName", settings.job_name.clone()),
        ("JobIndex", settings.job_index.to_string()),
        (
            "EtcdMaxConcurrentRequests",
            settings.etcd_max_concurrent_requests.to_string(),
        ),
        ("EtcdUrls", settings.etcd_urls.join(",")),
        (
            "MonitorIntervalSeconds",
            settings.monitor_interval_seconds.to_string(),
        ),
        ("SecurityEventLog", settings.security_event_log.clone()),
        (
            "ReadTimeoutMilliseconds",
            settings.read_timeout_milliseconds.to_string(),
        ),
        (
            "HandshakeTimeoutMilliseconds",
            settings.handshake_timeout_milliseconds.to_string(),
        ),
    ]
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

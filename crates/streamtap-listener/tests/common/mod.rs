//! Shared harness for stream listener integration tests.
//!
//! Each test binds its own upstream on an ephemeral port and runs
//! `StreamListener::start` on a spawned task that owns the output sender, so
//! draining the receiver to `None` collects everything the call wrote.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use streamtap_envelope::{decode_envelope, LogMessage};
use streamtap_listener::{Result, StreamListener, UpstreamListener};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const STREAM_ID: &str = "myApp";

/// Upper bound for anything that should happen "promptly".
pub const PROMPT: Duration = Duration::from_secs(2);

pub struct Running {
    pub task: JoinHandle<Result<()>>,
    pub output: mpsc::Receiver<Bytes>,
    pub stop: CancellationToken,
}

impl Running {
    /// Wait for `start` to return, failing the test if it takes too long.
    pub async fn finish(&mut self, within: Duration) -> Result<()> {
        tokio::time::timeout(within, &mut self.task)
            .await
            .expect("start should return in time")
            .expect("listener task should not panic")
    }

    /// Everything written to the output channel, once `start` has returned.
    pub async fn drain(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = self.output.recv().await {
            frames.push(frame);
        }
        frames
    }
}

pub async fn upstream() -> (UpstreamListener, String) {
    let upstream = UpstreamListener::bind("127.0.0.1:0")
        .await
        .expect("upstream should bind");
    let address = upstream.local_endpoint().to_string();
    (upstream, address)
}

pub fn spawn_start(listener: &Arc<StreamListener>, address: &str) -> Running {
    spawn_start_with_capacity(listener, address, 16)
}

/// Like [`spawn_start`], with a caller-chosen output channel capacity.
pub fn spawn_start_with_capacity(
    listener: &Arc<StreamListener>,
    address: &str,
    capacity: usize,
) -> Running {
    let (tx, output) = mpsc::channel(capacity);
    let stop = CancellationToken::new();

    let task = tokio::spawn({
        let listener = Arc::clone(listener);
        let address = address.to_string();
        let stop = stop.clone();
        async move { listener.start(&address, STREAM_ID, &tx, &stop).await }
    });

    Running { task, output, stop }
}

pub fn decode_log(frame: &Bytes) -> LogMessage {
    decode_envelope(frame)
        .expect("diagnostic should decode")
        .into_log_message()
        .expect("diagnostic should carry a log message")
}

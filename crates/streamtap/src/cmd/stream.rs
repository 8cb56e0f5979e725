use std::time::Duration;

use bytes::Bytes;
use streamtap_config::{Settings, DEFAULT_HANDSHAKE_TIMEOUT_MS};
use streamtap_envelope::LogEnvelopeEncoder;
use streamtap_listener::{Passthrough, StreamListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span};

use crate::cmd::{parse_timeout, runtime, StreamArgs};
use crate::exit::{config_error, listener_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, OutputFormat};

const OUTPUT_CAPACITY: usize = 64;

pub fn run(args: StreamArgs, format: OutputFormat) -> CliResult<i32> {
    let settings = args
        .config
        .as_ref()
        .map(Settings::load)
        .transpose()
        .map_err(|err| config_error("config load failed", err))?;

    let read_timeout = match &args.read_timeout {
        Some(raw) => parse_timeout(raw)?,
        None => settings
            .as_ref()
            .map(Settings::read_timeout)
            .unwrap_or(Duration::ZERO),
    };
    let handshake_timeout = match &args.handshake_timeout {
        Some(raw) => parse_timeout(raw)?,
        None => settings
            .as_ref()
            .map(Settings::handshake_timeout)
            .unwrap_or(Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS)),
    };

    let span = match &settings {
        Some(settings) => info_span!(
            "stream_listener",
            job = %settings.job_name,
            index = settings.job_index
        ),
        None => info_span!("stream_listener"),
    };
    let listener = StreamListener::new(
        LogEnvelopeEncoder,
        Passthrough,
        read_timeout,
        handshake_timeout,
    )
    .with_span(span);

    runtime()?.block_on(stream(listener, args, format))
}

async fn stream(
    listener: StreamListener,
    args: StreamArgs,
    format: OutputFormat,
) -> CliResult<i32> {
    let (tx, mut rx) = mpsc::channel::<Bytes>(OUTPUT_CAPACITY);
    let stop = CancellationToken::new();

    let signal = tokio::spawn({
        let stop = stop.clone();
        async move {
            tokio::select! {
                _ = stop.cancelled() => {}
                received = tokio::signal::ctrl_c() => {
                    if received.is_ok() {
                        debug!("interrupt received; stopping");
                        stop.cancel();
                    }
                }
            }
        }
    });

    let printer = tokio::spawn({
        let stop = stop.clone();
        let stream_id = args.stream_id.clone();
        let count = args.count;
        async move {
            let mut printed = 0usize;
            while let Some(payload) = rx.recv().await {
                print_frame(&payload, &stream_id, format);
                printed = printed.saturating_add(1);
                if count.is_some_and(|count| printed >= count) {
                    stop.cancel();
                    break;
                }
            }
            printed
        }
    });

    let result = listener
        .start(&args.address, &args.stream_id, &tx, &stop)
        .await;
    drop(tx);

    let printed = printer
        .await
        .map_err(|err| CliError::new(INTERNAL, format!("output task failed: {err}")))?;
    stop.cancel();
    let _ = signal.await;
    debug!(printed, "stream finished");

    result.map_err(|err| listener_error("stream ended", err))?;
    Ok(SUCCESS)
}

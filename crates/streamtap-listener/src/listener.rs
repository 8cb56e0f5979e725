use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use streamtap_envelope::EnvelopeEncoder;
use streamtap_frame::{
    channel_name, Frame, FrameCodec, FrameError, CONTROL, DATA, DEFAULT_MAX_PAYLOAD,
};
use streamtap_transport::{Endpoint, TapStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::connection::{Connection, FrameSource};
use crate::control::{ControlMessage, CONTROL_CLOSE, CONTROL_PING};
use crate::converter::FrameConverter;
use crate::error::{ListenerError, Result};
use crate::handshake::{handshake_client, HandshakeConfig};

/// Source tag stamped on diagnostic envelopes.
pub const DEFAULT_SOURCE_TYPE: &str = "DOP";

/// Component name used as the diagnostic message prefix.
const COMPONENT: &str = "StreamListener";

/// Pulls frames from one upstream server per [`start`](Self::start) call.
///
/// Every DATA frame goes through the injected converter and, unless dropped,
/// onto the caller's output channel. When the stream dies by idle timeout or
/// abrupt failure a single diagnostic envelope is written to the same channel
/// before `start` returns.
pub struct StreamListener {
    encoder: Box<dyn EnvelopeEncoder>,
    converter: Box<dyn FrameConverter>,
    read_timeout: Duration,
    handshake_timeout: Duration,
    source_type: String,
    handshake: HandshakeConfig,
    span: Span,
    live_reads: Arc<AtomicUsize>,
}

/// Why the streaming phase ended.
#[derive(Debug)]
enum Ended {
    Stopped,
    RemoteClosed(Option<String>),
    IdleTimeout,
    RemoteFailure(String),
}

enum ReadOutcome {
    Frame(Frame),
    Eof,
    Failed(FrameError),
}

type ReadTask = JoinHandle<(FrameSource, ReadOutcome)>;

enum Step {
    Stop,
    Read(std::result::Result<(FrameSource, ReadOutcome), tokio::task::JoinError>),
    Idle,
}

/// Keeps the live read task count honest even when a task is aborted.
struct ReadTaskGuard(Arc<AtomicUsize>);

impl ReadTaskGuard {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(gauge))
    }
}

impl Drop for ReadTaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StreamListener {
    /// Create a listener. A zero duration disables the matching timeout.
    pub fn new(
        encoder: impl EnvelopeEncoder + 'static,
        converter: impl FrameConverter + 'static,
        read_timeout: Duration,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            encoder: Box::new(encoder),
            converter: Box::new(converter),
            read_timeout,
            handshake_timeout,
            source_type: DEFAULT_SOURCE_TYPE.to_string(),
            handshake: HandshakeConfig::default(),
            span: info_span!("stream_listener"),
            live_reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Override the diagnostic source tag.
    pub fn with_source_type(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self
    }

    /// Parent span for every `start` call.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Override the client handshake config (protocol identity, size limit
    /// and the optional auth token sent to the upstream).
    pub fn with_handshake_config(mut self, config: HandshakeConfig) -> Self {
        self.handshake = config;
        self
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Number of read tasks currently alive across all calls.
    pub fn live_read_tasks(&self) -> usize {
        self.live_reads.load(Ordering::SeqCst)
    }

    /// Stream from `address` until the connection definitively ends.
    ///
    /// Returns `Ok(())` on stop or orderly remote close. Idle timeout and
    /// abrupt failure return an error after the diagnostic envelope has
    /// been written to `output`. Handshake failures are returned as-is with
    /// nothing written. `output` is never closed and `stop` is never
    /// cancelled by the listener.
    pub async fn start(
        &self,
        address: &str,
        stream_id: &str,
        output: &mpsc::Sender<Bytes>,
        stop: &CancellationToken,
    ) -> Result<()> {
        let span = info_span!(parent: &self.span, "start", %address, stream_id);
        self.run(address, stream_id, output, stop)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        address: &str,
        stream_id: &str,
        output: &mpsc::Sender<Bytes>,
        stop: &CancellationToken,
    ) -> Result<()> {
        let framed = tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!("stop requested while connecting");
                return Ok(());
            }
            connected = self.connect(address, stream_id) => connected?,
        };

        let (conn, source) = Connection::split(framed);
        let ended = match self.stream(&conn, source, output, stop).await {
            Ok(ended) => ended,
            Err(err) => {
                conn.close(None).await;
                return Err(err);
            }
        };

        match ended {
            Ended::Stopped => {
                conn.close(Some("stop requested")).await;
                debug!("stop requested");
                Ok(())
            }
            Ended::RemoteClosed(reason) => {
                conn.close(None).await;
                info!(reason = reason.as_deref().unwrap_or(""), "upstream closed stream");
                Ok(())
            }
            Ended::IdleTimeout => {
                warn!(timeout = ?self.read_timeout, "no frame within read timeout");
                let message = format!(
                    "{COMPONENT}.Start: Timed out listening to a doppler server after {}",
                    humantime::format_duration(self.read_timeout)
                );
                // Diagnostic first; the close frame may take up to the grace period.
                let delivered = self.finish(&message, stream_id, output, stop).await;
                conn.close(Some("read timeout")).await;
                delivered?;
                Err(ListenerError::IdleTimeout(self.read_timeout))
            }
            Ended::RemoteFailure(reason) => {
                warn!(%reason, "upstream connection failed");
                let message = format!("{COMPONENT}.Start: Error connecting to a doppler server");
                let delivered = self.finish(&message, stream_id, output, stop).await;
                conn.close(None).await;
                delivered?;
                Err(ListenerError::RemoteFailure(reason))
            }
        }
    }

    async fn connect(
        &self,
        address: &str,
        stream_id: &str,
    ) -> Result<Framed<TapStream, FrameCodec>> {
        let attempt = async {
            let endpoint = Endpoint::parse(address)?;
            let stream = streamtap_transport::connect(&endpoint).await?;
            let codec = FrameCodec::with_max_payload(self.handshake.max_handshake_payload);
            let mut framed = Framed::new(stream, codec);

            let session = handshake_client(&mut framed, stream_id, &self.handshake).await?;
            framed.codec_mut().set_max_payload_size(DEFAULT_MAX_PAYLOAD);

            info!(
                session_id = %session.session_id,
                version = %session.protocol_version,
                "connected to upstream"
            );
            Ok::<_, ListenerError>(framed)
        };

        if self.handshake_timeout.is_zero() {
            return attempt.await;
        }
        tokio::time::timeout(self.handshake_timeout, attempt)
            .await
            .map_err(|_| ListenerError::HandshakeTimeout(self.handshake_timeout))?
    }

    async fn stream(
        &self,
        conn: &Connection,
        mut source: FrameSource,
        output: &mpsc::Sender<Bytes>,
        stop: &CancellationToken,
    ) -> Result<Ended> {
        loop {
            let mut reader = self.spawn_read(source);
            let idle = idle_timer(self.read_timeout);

            let step = tokio::select! {
                biased;
                _ = stop.cancelled() => Step::Stop,
                joined = &mut reader => Step::Read(joined),
                _ = idle => Step::Idle,
            };

            let (next, outcome) = match step {
                Step::Stop => {
                    retire(reader).await;
                    return Ok(Ended::Stopped);
                }
                Step::Idle => {
                    retire(reader).await;
                    return Ok(Ended::IdleTimeout);
                }
                Step::Read(Err(err)) => {
                    return Ok(Ended::RemoteFailure(format!("read task failed: {err}")));
                }
                Step::Read(Ok(completed)) => completed,
            };
            source = next;

            if stop.is_cancelled() {
                return Ok(Ended::Stopped);
            }

            let frame = match outcome {
                ReadOutcome::Frame(frame) => frame,
                ReadOutcome::Eof => {
                    return Ok(Ended::RemoteFailure(
                        "connection closed without close frame".to_string(),
                    ))
                }
                ReadOutcome::Failed(err) => return Ok(Ended::RemoteFailure(err.to_string())),
            };

            match frame.channel {
                DATA => {
                    if !self.forward(frame.payload, output, stop).await? {
                        return Ok(Ended::Stopped);
                    }
                }
                CONTROL => {
                    if let Some(ended) = self.handle_control(conn, &frame).await {
                        return Ok(ended);
                    }
                }
                other => {
                    debug!(channel = other, name = channel_name(other), "ignoring frame");
                }
            }
        }
    }

    fn spawn_read(&self, mut source: FrameSource) -> ReadTask {
        let guard = ReadTaskGuard::enter(&self.live_reads);
        tokio::spawn(
            async move {
                let _guard = guard;
                let outcome = match source.next().await {
                    Some(Ok(frame)) => ReadOutcome::Frame(frame),
                    Some(Err(err)) => ReadOutcome::Failed(err),
                    None => ReadOutcome::Eof,
                };
                (source, outcome)
            }
            .in_current_span(),
        )
    }

    /// Convert and forward one DATA payload. Returns false if stop won the
    /// race against a full output channel.
    async fn forward(
        &self,
        payload: Bytes,
        output: &mpsc::Sender<Bytes>,
        stop: &CancellationToken,
    ) -> Result<bool> {
        let converted = self
            .converter
            .convert(payload)
            .map_err(ListenerError::Convert)?;
        let Some(bytes) = converted else {
            debug!("converter dropped frame");
            return Ok(true);
        };

        tokio::select! {
            biased;
            _ = stop.cancelled() => Ok(false),
            sent = output.send(bytes) => {
                sent.map_err(|_| ListenerError::OutputClosed)?;
                Ok(true)
            }
        }
    }

    async fn handle_control(&self, conn: &Connection, frame: &Frame) -> Option<Ended> {
        let msg = match ControlMessage::from_frame(frame) {
            Ok(msg) => msg,
            Err(err) => return Some(Ended::RemoteFailure(format!("invalid control frame: {err}"))),
        };

        match msg.msg_type.as_str() {
            CONTROL_CLOSE => Some(Ended::RemoteClosed(msg.reason().map(str::to_string))),
            CONTROL_PING => match conn.send_control(&ControlMessage::pong()).await {
                Ok(()) => None,
                Err(err) => Some(Ended::RemoteFailure(format!("failed to answer ping: {err}"))),
            },
            other => {
                debug!(msg_type = other, "ignoring control message");
                None
            }
        }
    }

    /// Deliver the diagnostic envelope for an abnormal end.
    ///
    /// Encoder failures are returned. A dropped receiver or a stop that wins
    /// against a full channel only loses the diagnostic.
    async fn finish(
        &self,
        message: &str,
        stream_id: &str,
        output: &mpsc::Sender<Bytes>,
        stop: &CancellationToken,
    ) -> Result<()> {
        let envelope = self.encoder.encode(&self.source_type, message, stream_id)?;

        tokio::select! {
            biased;
            sent = output.send(envelope) => {
                if sent.is_err() {
                    warn!("output channel closed before diagnostic was delivered");
                }
            }
            _ = stop.cancelled() => {
                warn!("stop requested before diagnostic was delivered");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StreamListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamListener")
            .field("read_timeout", &self.read_timeout)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("source_type", &self.source_type)
            .field("handshake", &self.handshake)
            .finish_non_exhaustive()
    }
}

async fn idle_timer(timeout: Duration) {
    if timeout.is_zero() {
        std::future::pending::<()>().await;
    } else {
        tokio::time::sleep(timeout).await;
    }
}

/// Abort the in-flight read and wait until its task is gone.
async fn retire(reader: ReadTask) {
    reader.abort();
    match reader.await {
        Ok(_) => debug!("read completed while retiring; result discarded"),
        Err(err) if err.is_cancelled() => {}
        Err(err) => warn!(error = %err, "read task failed while retiring"),
    }
}

#[cfg(test)]
mod tests {
    use streamtap_envelope::LogEnvelopeEncoder;

    use super::*;
    use crate::converter::Passthrough;

    #[test]
    fn defaults() {
        let listener = StreamListener::new(
            LogEnvelopeEncoder,
            Passthrough,
            Duration::from_millis(500),
            Duration::ZERO,
        );
        assert_eq!(listener.read_timeout(), Duration::from_millis(500));
        assert_eq!(listener.handshake_timeout(), Duration::ZERO);
        assert_eq!(listener.live_read_tasks(), 0);
        assert!(format!("{listener:?}").contains("source_type: \"DOP\""));
    }

    #[tokio::test]
    async fn invalid_address_is_a_handshake_failure() {
        let listener =
            StreamListener::new(LogEnvelopeEncoder, Passthrough, Duration::ZERO, Duration::ZERO);
        let (tx, mut rx) = mpsc::channel(1);

        let err = listener
            .start("ftp://nowhere", "app", &tx, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_handshake_failure());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_stop_returns_before_connecting() {
        let listener =
            StreamListener::new(LogEnvelopeEncoder, Passthrough, Duration::ZERO, Duration::ZERO);
        let (tx, _rx) = mpsc::channel(1);
        let stop = CancellationToken::new();
        stop.cancel();

        // 192.0.2.0/24 is TEST-NET-1; nothing answers
        listener
            .start("192.0.2.1:9", "app", &tx, &stop)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn idle_timer_zero_never_fires() {
        let fired = tokio::time::timeout(Duration::from_millis(100), idle_timer(Duration::ZERO)).await;
        assert!(fired.is_err());

        let fired = tokio::time::timeout(
            Duration::from_secs(5),
            idle_timer(Duration::from_millis(10)),
        )
        .await;
        assert!(fired.is_ok());
    }
}

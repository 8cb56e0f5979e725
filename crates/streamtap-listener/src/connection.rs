use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use streamtap_frame::{Frame, FrameCodec};
use streamtap_transport::TapStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::control::ControlMessage;
use crate::error::Result;

/// Upper bound on flushing a close frame and shutting down the write half.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

pub(crate) type FrameSink = SplitSink<Framed<TapStream, FrameCodec>, Frame>;
pub(crate) type FrameSource = SplitStream<Framed<TapStream, FrameCodec>>;

/// Write half of one listener connection with an idempotent close.
///
/// The read half is owned by whichever read task is in flight; once the sink
/// is dropped here and that task has been joined, the socket is gone.
pub(crate) struct Connection {
    sink: Mutex<Option<FrameSink>>,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn split(framed: Framed<TapStream, FrameCodec>) -> (Self, FrameSource) {
        let (sink, source) = framed.split();
        let conn = Self {
            sink: Mutex::new(Some(sink)),
            closed: AtomicBool::new(false),
        };
        (conn, source)
    }

    /// Send a CONTROL message. A no-op once the connection is closed.
    pub(crate) async fn send_control(&self, msg: &ControlMessage) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let frame = msg.to_frame()?;
        let mut guard = self.sink.lock().await;
        if let Some(sink) = guard.as_mut() {
            sink.send(frame).await?;
        }
        Ok(())
    }

    /// Close the connection exactly once.
    ///
    /// With `reason` set, a best-effort CONTROL close frame is sent first.
    /// Returns false if the connection was already closed.
    pub(crate) async fn close(&self, reason: Option<&str>) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        let Some(mut sink) = self.sink.lock().await.take() else {
            return false;
        };

        let shutdown = async {
            if let Some(reason) = reason {
                if let Ok(frame) = ControlMessage::close(Some(reason)).to_frame() {
                    if let Err(err) = sink.send(frame).await {
                        debug!(error = %err, "close frame not delivered");
                    }
                }
            }
            if let Err(err) = sink.close().await {
                debug!(error = %err, "shutdown of write half failed");
            }
        };
        if tokio::time::timeout(CLOSE_GRACE, shutdown).await.is_err() {
            debug!(grace = ?CLOSE_GRACE, "close did not finish within grace period");
        }
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use streamtap_frame::CONTROL;
    use streamtap_transport::{connect, Endpoint, TapListener};

    use super::*;
    use crate::control::CONTROL_CLOSE;

    async fn connected_pair() -> (Connection, FrameSource, Framed<TapStream, FrameCodec>) {
        let listener = TapListener::bind(&Endpoint::parse("127.0.0.1:0").unwrap())
            .await
            .unwrap();
        let client = connect(listener.local_endpoint()).await.unwrap();
        let server = listener.accept().await.unwrap();

        let (conn, source) = Connection::split(Framed::new(client, FrameCodec::new()));
        (conn, source, Framed::new(server, FrameCodec::new()))
    }

    #[tokio::test]
    async fn close_sends_reason_then_eof() {
        let (conn, _source, mut server) = connected_pair().await;

        assert!(conn.close(Some("stop requested")).await);
        assert!(conn.is_closed());

        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame.channel, CONTROL);
        let msg = ControlMessage::from_frame(&frame).unwrap();
        assert_eq!(msg.msg_type, CONTROL_CLOSE);
        assert_eq!(msg.reason(), Some("stop requested"));
        assert!(server.next().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_close_runs_once() {
        let (conn, _source, mut server) = connected_pair().await;
        let conn = Arc::new(conn);

        let a = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.close(Some("first")).await }
        });
        let b = tokio::spawn({
            let conn = Arc::clone(&conn);
            async move { conn.close(Some("second")).await }
        });
        let closed = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(closed.iter().filter(|c| **c).count(), 1);

        // exactly one close frame, then end of stream
        assert!(server.next().await.unwrap().is_ok());
        assert!(server.next().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_is_noop() {
        let (conn, _source, _server) = connected_pair().await;
        assert!(conn.close(None).await);
        assert!(!conn.close(None).await);
        conn.send_control(&ControlMessage::pong()).await.unwrap();
    }
}

use streamtap_frame::CONTROL;
use streamtap_listener::{ControlMessage, UpstreamListener, CONTROL_CLOSE};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::cmd::{parse_timeout, runtime, ServeArgs};
use crate::exit::{io_error, listener_error, CliResult, SUCCESS};
use crate::output::{print_listening, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let handshake_timeout = parse_timeout(&args.handshake_timeout)?;
    let runtime = runtime()?;
    let result = runtime.block_on(async move {
        let upstream = UpstreamListener::bind(&args.bind)
            .await
            .map_err(|err| listener_error("bind failed", err))?
            .with_handshake_timeout(handshake_timeout);
        print_listening(&upstream.local_endpoint().to_string(), format);

        serve(&upstream).await
    });
    // A stdin read may still be parked on the blocking pool.
    runtime.shutdown_background();
    result
}

async fn serve(upstream: &UpstreamListener) -> CliResult<i32> {
    let mut session = tokio::select! {
        accepted = upstream.accept() => {
            accepted.map_err(|err| listener_error("accept failed", err))?
        }
        _ = tokio::signal::ctrl_c() => return Ok(SUCCESS),
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sent = 0usize;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.map_err(|err| io_error("stdin read failed", err))? {
                    Some(line) => {
                        session
                            .send(line)
                            .await
                            .map_err(|err| listener_error("send failed", err))?;
                        sent += 1;
                    }
                    None => break,
                }
            }
            frame = session.recv() => {
                match frame {
                    Some(Ok(frame)) if frame.channel == CONTROL => {
                        if let Ok(msg) = ControlMessage::from_frame(&frame) {
                            if msg.msg_type == CONTROL_CLOSE {
                                info!(reason = msg.reason().unwrap_or(""), sent, "listener left");
                                return Ok(SUCCESS);
                            }
                            debug!(msg_type = %msg.msg_type, "control from listener");
                        }
                    }
                    Some(Ok(frame)) => debug!(channel = frame.channel, "ignoring frame"),
                    Some(Err(err)) => {
                        warn!(error = %err, "listener connection failed");
                        return Ok(SUCCESS);
                    }
                    None => {
                        info!(sent, "listener hung up");
                        return Ok(SUCCESS);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupt received; closing session");
                break;
            }
        }
    }

    session
        .close(Some("end of input"))
        .await
        .map_err(|err| listener_error("close failed", err))?;
    info!(sent, "stream closed");
    Ok(SUCCESS)
}

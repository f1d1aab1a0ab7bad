//! Streaming-channel supervisor: connect, pump, heartbeat, reconnect.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use pulsebridge_core::{ClientConfig, ConnectionState, InboundMessage, OutboundMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::{ActionReply, Inner, LiveEvent};

/// Reconnect delay for the given attempt (1-based):
/// `min(base * decay^(attempt - 1), max)`.
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn reconnect_delay(config: &ClientConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    config
        .reconnect_base
        .mul_f64(config.reconnect_decay.powi(exponent))
        .min(config.reconnect_max)
}

/// Owns the socket for the lifetime of the client's connected phase.
///
/// Runs until `disconnect()` is requested or reconnection is disabled and
/// the connection drops. Publishes every state transition on the watch
/// channel.
pub(crate) async fn supervise(
    inner: &Arc<Inner>,
    outbound_rx: &mut mpsc::Receiver<OutboundMessage>,
) {
    let mut attempt: u32 = 0;
    loop {
        if !inner.want_connected.load(Ordering::Acquire) {
            break;
        }
        let _ = inner.state_tx.send(ConnectionState::Connecting);
        let addr = (
            inner.config.stream_host.clone(),
            inner.config.stream_port,
        );
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                info!(
                    host = %inner.config.stream_host,
                    port = inner.config.stream_port,
                    "streaming channel connected"
                );
                attempt = 0;
                let _ = inner.state_tx.send(ConnectionState::Connected);
                run_connection(inner, stream, outbound_rx).await;
                inner.fail_pending();
                if !inner.want_connected.load(Ordering::Acquire) {
                    break;
                }
                warn!("streaming channel closed unexpectedly");
            }
            Err(err) => {
                warn!(error = %err, "streaming connect failed");
            }
        }
        if !inner.config.auto_reconnect {
            inner.want_connected.store(false, Ordering::Release);
            break;
        }
        let _ = inner.state_tx.send(ConnectionState::Reconnecting);
        attempt += 1;
        let delay = reconnect_delay(&inner.config, attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect backoff");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = inner.shutdown.notified() => {}
        }
    }
    let _ = inner.state_tx.send(ConnectionState::Disconnected);
}

type WriteHalf = SplitSink<Framed<TcpStream, LinesCodec>, String>;
type ReadHalf = SplitStream<Framed<TcpStream, LinesCodec>>;

async fn run_connection(
    inner: &Arc<Inner>,
    stream: TcpStream,
    outbound_rx: &mut mpsc::Receiver<OutboundMessage>,
) {
    let (mut sink, mut lines): (WriteHalf, ReadHalf) =
        Framed::new(stream, LinesCodec::new()).split();
    let period = inner.config.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    let mut last_activity = Instant::now();
    loop {
        // `notify_waiters` stores no permit: a disconnect that lands while
        // a branch body is executing is lost. Re-check the flag on every
        // wakeup so the shutdown still takes effect.
        if !inner.want_connected.load(Ordering::Acquire) {
            break;
        }
        tokio::select! {
            () = inner.shutdown.notified() => break,
            _ = heartbeat.tick() => {
                // Any inbound traffic counts as liveness; a fully silent
                // peer for two intervals means a half-open socket.
                if last_activity.elapsed() > period * 2 {
                    warn!("no liveness within two heartbeat intervals, forcing close");
                    break;
                }
                if send_line(&mut sink, &OutboundMessage::Ping).await.is_err() {
                    break;
                }
            }
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else { break };
                if send_line(&mut sink, &msg).await.is_err() {
                    break;
                }
            }
            line = lines.next() => {
                match line {
                    Some(Ok(line)) => {
                        last_activity = Instant::now();
                        handle_line(inner, &line);
                    }
                    Some(Err(err)) => {
                        warn!(error = %err, "streaming read error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

async fn send_line(sink: &mut WriteHalf, msg: &OutboundMessage) -> Result<(), ()> {
    let line = match serde_json::to_string(msg) {
        Ok(line) => line,
        Err(err) => {
            warn!(error = %err, "failed to encode outbound message");
            return Ok(());
        }
    };
    sink.send(line).await.map_err(|err| {
        warn!(error = %err, "streaming write error");
    })
}

fn handle_line(inner: &Arc<Inner>, line: &str) {
    let msg: InboundMessage = match serde_json::from_str(line) {
        Ok(msg) => msg,
        Err(err) => {
            // Unknown or malformed messages never tear down the channel.
            debug!(error = %err, "dropping undecodable inbound message");
            return;
        }
    };
    match msg {
        InboundMessage::Event { event, payload } => {
            let _ = inner.events_tx.send(LiveEvent { event, payload });
        }
        InboundMessage::CategoriesUpdate { categories } => {
            inner.replace_catalog(Some(categories), None, None);
        }
        InboundMessage::ActionsUpdate { actions } => {
            inner.replace_catalog(None, Some(actions), None);
        }
        InboundMessage::EventsUpdate { events } => {
            inner.replace_catalog(None, None, Some(events));
        }
        InboundMessage::FeaturesUpdate {
            categories,
            actions,
            events,
        } => {
            inner.replace_catalog(categories, actions, events);
        }
        InboundMessage::ActionResponse {
            id,
            success,
            result,
            error,
        } => match id {
            Some(id) => {
                if let Some((_, tx)) = inner.pending.remove(&id) {
                    let _ = tx.send(ActionReply {
                        success,
                        result,
                        error,
                    });
                } else {
                    debug!(%id, "discarding late or unknown response");
                }
            }
            None => debug!("discarding uncorrelated response"),
        },
        InboundMessage::Error { message } => {
            warn!(%message, "endpoint reported error");
        }
        InboundMessage::Pong => {}
    }
}

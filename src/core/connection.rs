// Per-session duplex connection: connect, pump, fixed-delay reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::state::ConnectionState;
use crate::updates::{CoreMsg, InternalEvent};

/// Runs for the lifetime of one session. State transitions and inbound
/// text frames are posted to the actor tagged with the session epoch, so
/// anything emitted after teardown is discarded at apply time.
///
/// Reconnects at a fixed interval, indefinitely, until the session's
/// `alive` flag flips or the outbound lane closes. The outbound receiver
/// survives reconnect cycles; the actor gates sends on the observed
/// `Connected` state, so frames queued here are only ever drained into a
/// live sink.
pub(super) async fn run_connection(
    url: String,
    retry_delay: Duration,
    epoch: u64,
    alive: Arc<AtomicBool>,
    core_tx: flume::Sender<CoreMsg>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let send_state = |state: ConnectionState| {
        let _ = core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::ConnectionStateChanged { epoch, state },
        )));
    };

    send_state(ConnectionState::Connecting);
    loop {
        if !alive.load(Ordering::SeqCst) {
            return;
        }

        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                tracing::info!(%url, "connected");
                send_state(ConnectionState::Connected);
                let (mut sink, mut stream) = ws.split();

                loop {
                    tokio::select! {
                        out = outbound_rx.recv() => match out {
                            Some(payload) => {
                                if let Err(e) = sink.send(Message::text(payload)).await {
                                    tracing::warn!(%e, "outbound send failed");
                                    break;
                                }
                            }
                            // Session torn down: the actor dropped its sender.
                            None => {
                                let _ = sink.close().await;
                                return;
                            }
                        },
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let _ = core_tx.send(CoreMsg::Internal(Box::new(
                                    InternalEvent::InboundFrame {
                                        epoch,
                                        raw: text.to_string(),
                                    },
                                )));
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(%e, "transport error");
                                break;
                            }
                        },
                    }
                }

                if !alive.load(Ordering::SeqCst) {
                    return;
                }
                tracing::info!(%url, delay = ?retry_delay, "connection lost, scheduling reconnect");
                send_state(ConnectionState::Reconnecting);
            }
            Err(e) => {
                if !alive.load(Ordering::SeqCst) {
                    return;
                }
                tracing::warn!(%url, %e, "connect failed, scheduling reconnect");
                send_state(ConnectionState::Reconnecting);
            }
        }

        tokio::time::sleep(retry_delay).await;
    }
}

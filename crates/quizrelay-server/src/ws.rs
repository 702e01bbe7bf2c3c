//! WebSocket connection layer: upgrade, heartbeat, rate limiting,
//! framing, and the per-connection read loop feeding the dispatcher.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use quizrelay_core::error::ErrorKind;
use quizrelay_core::protocol::{MAX_FRAME_BYTES, ProtocolError, ServerFrame, decode_client_frame};

use crate::handlers::{self, ConnCtx};
use crate::registry::ChannelHandle;
use crate::state::{AppState, ConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (ws_sender, ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel::<Message>(state.config.limits.outbound_buffer);
    let cancel = CancellationToken::new();
    let handle = ChannelHandle::new(tx, cancel.clone());
    let conn_id = handle.conn_id;

    spawn_writer(ws_sender, rx);

    let mut conn = ConnCtx::new(handle);
    read_loop(ws_receiver, &state, &mut conn, cancel).await;

    // The socket is gone; detach whatever role it held.
    handlers::handle_disconnect(&state, &conn).await;
    tracing::debug!(conn_id, "Connection closed");
}

/// Drain the outbound queue into the WS sink until either end closes.
fn spawn_writer(mut ws_sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<Message>) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });
}

/// Sliding-window message counter for one connection: messages over the
/// limit are dropped (with one error frame per window), messages over
/// three times the limit close the connection.
struct RateWindow {
    window_start: Instant,
    count: u32,
    warned: bool,
}

enum RateDecision {
    Allow,
    Drop { warn: bool },
    Close,
}

impl RateWindow {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            warned: false,
        }
    }

    fn note(&mut self, limit: u32) -> RateDecision {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
            self.warned = false;
        }
        self.count += 1;
        if self.count > limit.saturating_mul(3) {
            RateDecision::Close
        } else if self.count > limit {
            let warn = !self.warned;
            self.warned = true;
            RateDecision::Drop { warn }
        } else {
            RateDecision::Allow
        }
    }
}

async fn read_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    state: &AppState,
    conn: &mut ConnCtx,
    cancel: CancellationToken,
) {
    let limit = state.config.limits.rate_limit_per_sec;
    let mut rate = RateWindow::new();

    let mut heartbeat = tokio::time::interval(Duration::from_secs(
        state.config.limits.heartbeat_interval_secs,
    ));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately and doubles as the initial ping.
    let mut alive = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = state.shutdown.cancelled() => break,
            _ = heartbeat.tick() => {
                if !alive {
                    tracing::info!(
                        conn_id = conn.handle.conn_id,
                        "No pong since last sweep, closing connection"
                    );
                    break;
                }
                alive = false;
                conn.handle.send_raw(Message::Ping(Bytes::new()));
            }
            incoming = ws_receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    _ => break,
                };
                match msg {
                    Message::Pong(_) => alive = true,
                    // axum answers pings on its own
                    Message::Ping(_) => {},
                    Message::Close(_) => break,
                    // The protocol is JSON text; binary frames are noise.
                    Message::Binary(_) => {},
                    Message::Text(text) => {
                        match rate.note(limit) {
                            RateDecision::Close => {
                                tracing::warn!(
                                    conn_id = conn.handle.conn_id,
                                    "Sustained rate-limit breach, closing connection"
                                );
                                break;
                            },
                            RateDecision::Drop { warn } => {
                                if warn {
                                    tracing::warn!(
                                        conn_id = conn.handle.conn_id,
                                        "Rate limit exceeded"
                                    );
                                    conn.handle.send(&ServerFrame::error(ErrorKind::RateLimited));
                                }
                                continue;
                            },
                            RateDecision::Allow => {},
                        }

                        if text.len() > MAX_FRAME_BYTES {
                            tracing::debug!(
                                conn_id = conn.handle.conn_id,
                                size = text.len(),
                                "Dropping oversized frame"
                            );
                            continue;
                        }

                        match decode_client_frame(&text) {
                            Ok(frame) => handlers::dispatch(state, conn, frame).await,
                            Err(ProtocolError::UnknownType(t)) => {
                                tracing::debug!(
                                    conn_id = conn.handle.conn_id,
                                    unknown_type = %t,
                                    "Ignoring unknown message type"
                                );
                            },
                            Err(e) => {
                                tracing::debug!(
                                    conn_id = conn.handle.conn_id,
                                    error = %e,
                                    "Malformed frame"
                                );
                                conn.handle.send(&ServerFrame::error(ErrorKind::MalformedFrame));
                            },
                        }
                    },
                }
            }
        }
    }
}

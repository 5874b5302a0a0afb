//! WebSocket session bus (spec.md §6).
//!
//! One socket can join any number of sessions; each joined session
//! gets its own `OutputSink` that forwards decoded bytes back to this
//! connection as `output` events. The split-socket-plus-writer-task
//! shape mirrors the teacher's `handlers/ws.rs`
//! (`futures::{SinkExt, StreamExt}` over a `WebSocket`, one mpsc
//! channel per connection feeding a dedicated write loop); the
//! CLI-bridge/web-client distinction the teacher's `ConnectionManager`
//! made doesn't apply here; the server owns the PTY directly.

use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use sandterm_core::OutputSink;
use sandterm_types::{ClientEvent, ServerEvent, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bound on a single connection's outbound queue. A slow client falls
/// behind and its oldest-queued output is dropped rather than stalling
/// the session's PTY reader (spec.md §4.7, §9).
const OUTBOUND_QUEUE: usize = 512;

pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

enum Outbound {
    Event(ServerEvent),
    Close,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                Outbound::Event(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if ws_sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // session_id -> sink id, so `leave` and disconnect can detach cleanly.
    let mut joined: HashMap<SessionId, u64> = HashMap::new();

    let _ = send(&tx, ServerEvent::Connected).await;

    while let Some(Ok(msg)) = ws_stream.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let event: ClientEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(e) => {
                let _ = send(
                    &tx,
                    ServerEvent::Error {
                        message: format!("malformed message: {e}"),
                    },
                )
                .await;
                continue;
            }
        };

        handle_event(event, &state, &tx, &mut joined).await;
    }

    for (session_id, sink_id) in joined.drain() {
        if let Some(session) = state.registry.get(&session_id) {
            session.detach(sink_id);
        }
    }
    let _ = tx.send(Outbound::Close).await;
    let _ = writer.await;
}

async fn handle_event(
    event: ClientEvent,
    state: &AppState,
    tx: &mpsc::Sender<Outbound>,
    joined: &mut HashMap<SessionId, u64>,
) {
    match event {
        ClientEvent::Join { session_id } => {
            let Some(session) = state.registry.get(&session_id) else {
                let _ = send(
                    tx,
                    ServerEvent::Error {
                        message: format!("session not found: {session_id}"),
                    },
                )
                .await;
                return;
            };
            if joined.contains_key(&session_id) {
                return;
            }
            let sink = Arc::new(SessionSink {
                session_id,
                tx: tx.clone(),
            });
            let sink_id = session.attach(sink);
            joined.insert(session_id, sink_id);

            let summary = session.summary().await;
            let _ = send(
                tx,
                ServerEvent::Joined {
                    session_id,
                    session: summary,
                },
            )
            .await;
        }
        ClientEvent::Leave { session_id } => {
            if let Some(sink_id) = joined.remove(&session_id) {
                if let Some(session) = state.registry.get(&session_id) {
                    session.detach(sink_id);
                }
            }
            let _ = send(tx, ServerEvent::Left { session_id }).await;
        }
        ClientEvent::Input { session_id, data } => {
            let Some(session) = state.registry.get(&session_id) else {
                let _ = send(
                    tx,
                    ServerEvent::Error {
                        message: format!("session not found: {session_id}"),
                    },
                )
                .await;
                return;
            };
            if let Err(e) = session.write(data.into_bytes()).await {
                let _ = send(
                    tx,
                    ServerEvent::Error {
                        message: e.to_string(),
                    },
                )
                .await;
            }
        }
        ClientEvent::Resize {
            session_id,
            cols,
            rows,
        } => {
            let Some(session) = state.registry.get(&session_id) else {
                let _ = send(
                    tx,
                    ServerEvent::Error {
                        message: format!("session not found: {session_id}"),
                    },
                )
                .await;
                return;
            };
            match session.resize(cols, rows).await {
                Ok(()) => {
                    let _ = send(
                        tx,
                        ServerEvent::Resized {
                            session_id,
                            cols,
                            rows,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    let _ = send(
                        tx,
                        ServerEvent::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        }
        ClientEvent::Terminate { session_id } => {
            if let Err(e) = state.registry.terminate(&session_id).await {
                let _ = send(
                    tx,
                    ServerEvent::Error {
                        message: e.to_string(),
                    },
                )
                .await;
                return;
            }
            joined.remove(&session_id);
            let _ = send(tx, ServerEvent::Terminated { session_id }).await;
        }
    }
}

async fn send(tx: &mpsc::Sender<Outbound>, event: ServerEvent) -> Result<(), ()> {
    tx.send(Outbound::Event(event)).await.map_err(|_| ())
}

/// Fans one session's raw output to this connection's write queue,
/// lossily decoding it the way the original's socket.io bridge did
/// (`data.decode('utf-8', errors='replace')`).
struct SessionSink {
    session_id: SessionId,
    tx: mpsc::Sender<Outbound>,
}

impl OutputSink for SessionSink {
    fn deliver(&self, bytes: &[u8]) {
        let _ = self.tx.try_send(Outbound::Event(ServerEvent::Output {
            session_id: self.session_id,
            data: String::from_utf8_lossy(bytes).into_owned(),
        }));
    }

    fn close(&self) {
        let _ = self.tx.try_send(Outbound::Event(ServerEvent::Terminated {
            session_id: self.session_id,
        }));
    }
}

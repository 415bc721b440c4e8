//! WebSocket endpoint: streamed answers on request, refresh updates pushed
//! to every connected client.

use super::AppState;
use crate::engine::{QueryEngine, QueryRequest, StreamEvent};
use crate::refresh::CycleSummary;
use crate::sources::SourceKind;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Query {
        /// Echoed on every frame of the answer; assigned by the server when absent.
        #[serde(default)]
        id: Option<String>,
        #[serde(flatten)]
        request: QueryRequest,
    },
    Ping,
}

/// A stream event labelled with the query it answers, so concurrent answers
/// on one socket can be told apart.
#[derive(Debug, Serialize)]
pub struct QueryFrame<'a> {
    pub id: &'a str,
    #[serde(flatten)]
    pub event: &'a StreamEvent,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Welcome {
        message: &'static str,
        timestamp: DateTime<Utc>,
        sources: Vec<SourceKind>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Update {
        summary: CycleSummary,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

/// JSON objects are protocol frames; anything else is a plain-text query.
pub fn parse_client_frame(text: &str) -> Result<ClientFrame, String> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|e| format!("invalid message: {e}"))
    } else {
        Ok(ClientFrame::Query {
            id: None,
            request: QueryRequest::new(trimmed),
        })
    }
}

struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn encode<T: Serialize>(frame: &T) -> Option<String> {
    serde_json::to_string(frame)
        .inspect_err(|e| warn!(error = %e, "failed to encode frame"))
        .ok()
}

pub async fn handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| connection(socket, state))
}

async fn connection(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(state.connections.clone());
    info!(connections = state.connections.load(Ordering::Relaxed), "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut updates = state.updates.subscribe();
    let update_tx = out_tx.clone();
    let updater = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(summary) => {
                    if let Some(text) = encode(&ServerFrame::Update { summary })
                        && update_tx.send(text).await.is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "websocket client lagging behind updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let welcome = ServerFrame::Welcome {
        message: "Connected to LiveMind",
        timestamp: Utc::now(),
        sources: state.engine.config().fanout.enabled_sources.clone(),
    };
    if let Some(text) = encode(&welcome) {
        let _ = out_tx.send(text).await;
    }

    let mut served = 0u64;
    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => handle_text(text.as_str(), &state, &out_tx, &mut served).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    updater.abort();
    writer.abort();
    info!("websocket disconnected");
}

async fn handle_text(
    text: &str,
    state: &AppState,
    out: &mpsc::Sender<String>,
    served: &mut u64,
) {
    match parse_client_frame(text) {
        Ok(ClientFrame::Ping) => {
            if let Some(text) = encode(&ServerFrame::Pong {
                timestamp: Utc::now(),
            }) {
                let _ = out.send(text).await;
            }
        }
        Ok(ClientFrame::Query { id, request }) => {
            *served += 1;
            let id = id.unwrap_or_else(|| format!("q{served}"));
            // Runs detached so pings are still answered mid-query.
            tokio::spawn(stream_answer(state.engine.clone(), id, request, out.clone()));
        }
        Err(message) => {
            if let Some(text) = encode(&ServerFrame::Error {
                code: "VALIDATION_ERROR",
                message,
            }) {
                let _ = out.send(text).await;
            }
        }
    }
}

/// Stream one answer to `out`, every frame carrying `id`.
async fn stream_answer(
    engine: Arc<QueryEngine>,
    id: String,
    request: QueryRequest,
    out: mpsc::Sender<String>,
) {
    let (ev_tx, mut ev_rx) = mpsc::channel::<StreamEvent>(64);
    let forward = async {
        while let Some(event) = ev_rx.recv().await {
            let frame = QueryFrame {
                id: &id,
                event: &event,
            };
            if let Some(text) = encode(&frame) {
                let _ = out.send(text).await;
            }
        }
    };
    let (result, ()) = tokio::join!(engine.answer_stream(request, ev_tx), forward);
    if let Err(e) = result {
        debug!(query_id = %id, error = %e, "websocket query rejected");
    }
}

// crates/server/src/ws.rs
//! Push delivery of one job's progress over a WebSocket.
//!
//! The client sends `{"jobId": "..."}`. The server answers with the current
//! snapshot, then every newer snapshot of that job, and closes the socket
//! after the terminal one. Polling `GET /api/jobs/{id}` sees the same data.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use longrun_core::{JobId, JobSnapshot};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchRequest {
    job_id: String,
}

pub async fn progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_json<T: Serialize>(
    sink: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).map_err(axum::Error::new)?;
    sink.send(Message::Text(text.into())).await
}

async fn send_error(sink: &mut SplitSink<WebSocket, Message>, error: &str) -> Result<(), axum::Error> {
    send_json(sink, &serde_json::json!({ "error": error })).await
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    // Wait for a valid watch request.
    let job_id = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<WatchRequest>(text.as_str()) {
                    Ok(req) => match req.job_id.parse::<JobId>() {
                        Ok(id) => break id,
                        Err(_) => {
                            if send_error(&mut sink, "invalid job id").await.is_err() {
                                return;
                            }
                        }
                    },
                    Err(_) => {
                        if send_error(&mut sink, "expected {\"jobId\": ...}").await.is_err() {
                            return;
                        }
                    }
                }
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
            Some(Ok(_)) => {}
        }
    };

    // Subscribe before the first query so no transition falls in between.
    let mut rx = state.tracker.subscribe();
    let mut last: JobSnapshot = match state.tracker.query(job_id) {
        Ok(snapshot) => snapshot,
        Err(_) => {
            let _ = send_error(&mut sink, "job not found").await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };
    if send_json(&mut sink, &last).await.is_err() {
        return;
    }
    info!(job_id = %job_id, "progress watcher attached");

    while !last.is_terminal() {
        tokio::select! {
            update = rx.recv() => {
                let next = match update {
                    Ok(snapshot) if snapshot.job_id == job_id => snapshot,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(job_id = %job_id, skipped, "watcher lagged, resyncing");
                        match state.tracker.query(job_id) {
                            Ok(snapshot) => snapshot,
                            Err(_) => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                };
                if next.supersedes(&last) {
                    if send_json(&mut sink, &next).await.is_err() {
                        return;
                    }
                    last = next;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!(job_id = %job_id, "progress watcher left");
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    info!(job_id = %job_id, state = %last.state, "progress watcher finished");
}

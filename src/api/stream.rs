//! Event streaming endpoints: per-task SSE and the global WebSocket.
//!
//! Both multiplex the same event bus. Each subscription starts with a
//! synthetic snapshot drawn from current state so late joiners are
//! consistent, then streams events in order. A subscriber that falls
//! behind gets a `lagged` event carrying a fresh snapshot instead of ever
//! blocking a producer.

use crate::api::errors::{api_error, ApiError};
use crate::core::Scheduler;
use crate::event::{EventKind, OrchestratorEvent};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Path};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use futures::stream::Stream;
use serde_json::Value;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

fn snapshot_event(task_id: &str, payload: Value) -> OrchestratorEvent {
    OrchestratorEvent::new(EventKind::Snapshot, task_id, None, payload)
}

fn lagged_event(task_id: &str, payload: Value) -> OrchestratorEvent {
    OrchestratorEvent::new(EventKind::Lagged, task_id, None, payload)
}

/// SSE stream of one task's events
pub async fn task_events(
    Path(id): Path<String>,
    Extension(scheduler): Extension<Scheduler>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // Subscribe before reading the snapshot so no event can fall between.
    let mut rx = scheduler.bus().subscribe_task(&id);
    let task = scheduler
        .get_task(&id)
        .await
        .ok_or_else(|| api_error(axum::http::StatusCode::NOT_FOUND, "Task not found"))?;

    let stream = async_stream::stream! {
        let snapshot = snapshot_event(&id, serde_json::to_value(&task).unwrap_or(Value::Null));
        if let Ok(json) = serde_json::to_string(&snapshot) {
            yield Ok(Event::default().data(json));
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE client lagged, resyncing from state");
                    let payload = match scheduler.get_task(&id).await {
                        Some(task) => serde_json::to_value(&task).unwrap_or(Value::Null),
                        None => Value::Null,
                    };
                    if let Ok(json) = serde_json::to_string(&lagged_event(&id, payload)) {
                        yield Ok(Event::default().data(json));
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}

/// Bidirectional subscription carrying the same events across all tasks
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(scheduler): Extension<Scheduler>,
) -> Response {
    info!("WebSocket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, scheduler))
}

async fn handle_socket(mut socket: WebSocket, scheduler: Scheduler) {
    let mut rx = scheduler.bus().subscribe_all();

    // Initial snapshot: every known task, newest first.
    let tasks = scheduler.list_tasks().await;
    let snapshot = snapshot_event("*", serde_json::to_value(&tasks).unwrap_or(Value::Null));
    if let Ok(json) = serde_json::to_string(&snapshot) {
        if socket.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            ws_msg = socket.recv() => {
                match ws_msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagged, resyncing from state");
                        let tasks = scheduler.list_tasks().await;
                        let payload = serde_json::to_value(&tasks).unwrap_or(Value::Null);
                        if let Ok(json) = serde_json::to_string(&lagged_event("*", payload)) {
                            if socket.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("WebSocket disconnected");
}

//! API routes configuration module

use crate::api::handlers::{
    approve_phase, create_task, get_phase_results, get_task, get_task_phase, health, list_tasks,
};
use crate::api::stream::{task_events, ws_handler};
use crate::core::Scheduler;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Creates and configures the API router with all routes
///
/// # Arguments
/// * `scheduler` - Scheduler shared across handlers; the only component
///   that mutates domain state
pub fn app(scheduler: Scheduler) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/task", post(create_task).get(list_tasks))
        .route("/api/task/:id", get(get_task))
        .route("/api/task/:id/phase/:phase_id", get(get_task_phase))
        .route("/api/task/:id/events", get(task_events))
        .route("/api/phase/:id/:phase_id", get(get_phase_results))
        .route("/api/phases/approve", post(approve_phase))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(cors)
        .layer(Extension(scheduler))
}

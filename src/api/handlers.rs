use crate::api::errors::{api_error, ApiError};
use crate::core::{Scheduler, Task};
use crate::errors::Error;
use axum::http::StatusCode;
use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Represents the request payload for submitting a new task
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub task: String,
    /// Defaults to true; auto-advancing tasks opt out explicitly
    #[serde(default = "default_requires_approval")]
    pub requires_user_approval: bool,
}

fn default_requires_approval() -> bool {
    true
}

/// Represents the response payload after successfully submitting a task
#[derive(Serialize)]
pub struct CreateTaskResponse {
    pub id: String,
    pub status: String,
}

/// Represents the request payload for a phase approval decision
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseApprovalRequest {
    pub task_id: String,
    pub phase_id: String,
    pub approved: bool,
    #[serde(default)]
    pub user_feedback: Option<String>,
}

/// Submits a new task for execution
///
/// # Returns
/// * `Result<Json<CreateTaskResponse>, ApiError>` - Task id and initial status, or error
#[axum::debug_handler]
pub async fn create_task(
    Extension(scheduler): Extension<Scheduler>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, ApiError> {
    if payload.task.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Task is required"));
    }

    let task = scheduler
        .submit(payload.task, payload.requires_user_approval)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;

    Ok(Json(CreateTaskResponse {
        id: task.id,
        status: task.status.to_string(),
    }))
}

/// Lists every known task, newest first
#[axum::debug_handler]
pub async fn list_tasks(Extension(scheduler): Extension<Scheduler>) -> Json<Vec<Task>> {
    Json(scheduler.list_tasks().await)
}

/// Retrieves one task snapshot by id
#[axum::debug_handler]
pub async fn get_task(
    Path(id): Path<String>,
    Extension(scheduler): Extension<Scheduler>,
) -> Result<Json<Task>, ApiError> {
    match scheduler.get_task(&id).await {
        Some(task) => Ok(Json(task)),
        None => Err(api_error(StatusCode::NOT_FOUND, "Task not found")),
    }
}

/// Retrieves one phase snapshot by task id and phase id
#[axum::debug_handler]
pub async fn get_task_phase(
    Path((id, phase_id)): Path<(String, String)>,
    Extension(scheduler): Extension<Scheduler>,
) -> Result<Json<Value>, ApiError> {
    let task = scheduler
        .get_task(&id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Task not found"))?;
    let phase = task
        .phase(&phase_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Phase not found"))?;
    Ok(Json(json!(phase)))
}

/// Retrieves a phase plus per-expert detail
#[axum::debug_handler]
pub async fn get_phase_results(
    Path((id, phase_id)): Path<(String, String)>,
    Extension(scheduler): Extension<Scheduler>,
) -> Result<Json<Value>, ApiError> {
    let task = scheduler
        .get_task(&id)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Task not found"))?;
    let phase = task
        .phase(&phase_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Phase not found"))?;

    let mut detailed_results = serde_json::Map::new();
    for expert in &phase.experts {
        detailed_results.insert(
            expert.role.clone(),
            json!({
                "expertise": expert.expertise,
                "task": expert.task,
                "status": expert.status,
                "result": expert.result,
            }),
        );
    }

    Ok(Json(json!({
        "phase": phase,
        "detailedResults": detailed_results,
    })))
}

/// Applies a user approval decision to a phase
#[axum::debug_handler]
pub async fn approve_phase(
    Extension(scheduler): Extension<Scheduler>,
    Json(payload): Json<PhaseApprovalRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = scheduler
        .handle_approval(
            &payload.task_id,
            &payload.phase_id,
            payload.approved,
            payload.user_feedback,
        )
        .await
        .map_err(|e| match e {
            Error::TaskNotFound(_) => api_error(StatusCode::NOT_FOUND, "Task not found"),
            Error::PhaseNotFound(_) => api_error(StatusCode::NOT_FOUND, "Phase not found"),
            Error::PhaseNotApprovable(_) => api_error(StatusCode::CONFLICT, &e.to_string()),
            other => api_error(StatusCode::INTERNAL_SERVER_ERROR, &other.to_string()),
        })?;

    Ok(Json(json!({
        "success": true,
        "phase": outcome.phase,
        "task": outcome.task,
    })))
}

/// Liveness endpoint
#[axum::debug_handler]
pub async fn health(Extension(scheduler): Extension<Scheduler>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "tasks": scheduler.task_count(),
        "timestamp": Utc::now(),
    }))
}

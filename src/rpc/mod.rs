//! Single-shot RPC to a sandboxed worker.
//!
//! The worker is an opaque JSON-over-HTTP server exposing one `/execute`
//! endpoint. The client owns the retry/timeout discipline; interpretation
//! of sub-task delegation stays with the scheduler so that policy
//! decisions remain in one place.

use crate::config::RpcConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Request sent to a worker's `/execute` endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub task_id: String,
    pub persona_prompt: String,
    pub task_instructions: String,
    /// Always present on the wire; a missing map is normalized to empty
    pub context_data: HashMap<String, String>,
    pub can_delegate: bool,
}

/// One sub-task a worker asks to hand off
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskRequest {
    pub requested_persona: String,
    pub task_details: String,
}

/// Reply from a worker's `/execute` endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReply {
    #[serde(default)]
    pub task_id: String,
    pub success: bool,
    #[serde(default)]
    pub final_content: String,
    #[serde(default)]
    pub error_message: String,
    #[serde(default)]
    pub sub_tasks: Vec<SubTaskRequest>,
}

/// Failure taxonomy surfaced to the scheduler
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The worker could not be reached within the retry budget, or the
    /// transport broke mid-call
    #[error("transport error: {0}")]
    Transport(String),
    /// The call completed but the worker flagged `success = false`
    #[error("worker reported failure: {0}")]
    WorkerReported(String),
    /// The call completed but the reply is structurally unusable
    #[error("malformed worker reply: {0}")]
    Malformed(String),
}

/// HTTP client for worker calls, shared across all expert activities
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    max_attempts: u32,
    backoff: Duration,
}

impl WorkerClient {
    pub fn new(config: &RpcConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .expect("Failed to build worker HTTP client");
        Self {
            http,
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff,
        }
    }

    /// Calls a worker once, retrying transport failures with linear
    /// backoff. Worker-reported and malformed outcomes are returned
    /// immediately; retrying them would just repeat the same answer.
    pub async fn call(
        &self,
        address: &str,
        request: WorkerRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<WorkerReply, CallError> {
        let url = format!("http://{}/execute", address);
        let mut last_transport = String::new();

        for attempt in 1..=self.max_attempts {
            debug!(
                "[{}] Attempt {}/{}: calling worker at {}",
                request.task_id, attempt, self.max_attempts, address
            );

            match self.attempt(&url, &request, deadline, cancel).await {
                Ok(reply) => return interpret(reply),
                Err(CallError::Transport(detail)) => {
                    warn!(
                        "[{}] Attempt {} failed: {}",
                        request.task_id, attempt, detail
                    );
                    last_transport = detail;
                }
                Err(other) => return Err(other),
            }

            if attempt < self.max_attempts {
                let wait = self.backoff * attempt;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(CallError::Transport("call cancelled".to_string()));
                    }
                    _ = sleep(wait) => {}
                }
            }
        }

        Err(CallError::Transport(format!(
            "failed after {} attempts: {}",
            self.max_attempts, last_transport
        )))
    }

    async fn attempt(
        &self,
        url: &str,
        request: &WorkerRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<WorkerReply, CallError> {
        let send = self.http.post(url).timeout(deadline).json(request).send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CallError::Transport("call cancelled".to_string()));
            }
            result = send => result.map_err(|e| CallError::Transport(e.to_string()))?,
        };

        if !response.status().is_success() {
            return Err(CallError::Transport(format!(
                "worker returned HTTP {}",
                response.status()
            )));
        }

        response
            .json::<WorkerReply>()
            .await
            .map_err(|e| CallError::Malformed(format!("could not decode reply: {}", e)))
    }
}

/// Classifies a transport-successful reply.
fn interpret(reply: WorkerReply) -> Result<WorkerReply, CallError> {
    if !reply.success {
        let detail = if reply.error_message.is_empty() {
            "worker gave no detail".to_string()
        } else {
            reply.error_message.clone()
        };
        return Err(CallError::WorkerReported(detail));
    }
    if reply.final_content.trim().is_empty() && reply.sub_tasks.is_empty() {
        return Err(CallError::Malformed(
            "success with neither final content nor sub-tasks".to_string(),
        ));
    }
    Ok(reply)
}

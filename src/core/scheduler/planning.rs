//! The planning step: one planner worker turns the objective into an
//! ordered list of phases. Planning failures are fatal to the task.

use super::Scheduler;
use crate::constants::{PLANNER_PERSONA, PLANNING_PROMPT_TEMPLATE};
use crate::core::plan::parse_plan;
use crate::core::status::TaskStatus;
use crate::event::EventKind;
use crate::rpc::{CallError, WorkerRequest};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

impl Scheduler {
    /// Background execution entry for a freshly submitted task.
    pub(crate) async fn execute(&self, task_id: String) {
        info!("[{}] Starting task execution", task_id);
        if let Err(reason) = self.run_planning(&task_id).await {
            error!("[{}] Planning failed: {}", task_id, reason);
            self.fail_task(&task_id, reason).await;
        }
    }

    async fn run_planning(&self, task_id: &str) -> Result<(), String> {
        let slot = self.slot(task_id).map_err(|e| e.to_string())?;

        let objective = {
            let mut task = slot.task.lock().await;
            task.status = TaskStatus::Planning;
            task.touch();
            self.persist(&task).map_err(|e| e.to_string())?;
            task.task.clone()
        };

        let handle = self
            .sandbox
            .spawn(&slot.cancel)
            .await
            .map_err(|e| format!("failed to spawn planner worker: {}", e))?;
        if !handle.ready {
            warn!(
                "[{}] Planner worker not ready in time; relying on the call retry budget",
                task_id
            );
        }

        let request = WorkerRequest {
            task_id: format!("{}-planner", task_id),
            persona_prompt: PLANNER_PERSONA.to_string(),
            task_instructions: PLANNING_PROMPT_TEMPLATE.replace("{objective}", &objective),
            context_data: HashMap::new(),
            can_delegate: false,
        };
        let outcome = self
            .worker
            .call(
                &handle.address,
                request,
                self.config.planner_call_timeout,
                &slot.cancel,
            )
            .await;

        if matches!(outcome, Err(CallError::Transport(_))) {
            if let Ok(tail) = self.sandbox.logs(&handle.id) {
                debug!("[{}] Planner worker log tail:\n{}", task_id, tail);
            }
        }
        if let Err(e) = self.sandbox.stop(&handle.id).await {
            warn!("[{}] Failed to stop planner worker: {}", task_id, e);
        }

        let reply = outcome.map_err(|e| format!("planner call failed: {}", e))?;
        let phases = parse_plan(&reply.final_content).map_err(|e| format!("PlanInvalid: {}", e))?;
        info!("[{}] Plan generated with {} phases", task_id, phases.len());

        {
            let mut task = slot.task.lock().await;
            task.phases = phases;
            task.current_phase = 0;
            task.status = TaskStatus::Running;
            task.touch();
            self.persist(&task).map_err(|e| e.to_string())?;
            self.publish_snapshot(EventKind::PlanGenerated, &task, None);
        }

        self.start_phase(task_id, 0).await.map_err(|e| e.to_string())
    }
}

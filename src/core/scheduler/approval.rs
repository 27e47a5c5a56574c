//! The approval gate: user decisions on completed phases.

use super::Scheduler;
use crate::core::status::{PhaseStatus, TaskStatus};
use crate::core::task::{Phase, Task};
use crate::errors::Error;
use crate::event::EventKind;
use tracing::info;

/// Snapshot pair returned to the caller after a decision is applied
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub phase: Phase,
    pub task: Task,
}

impl Scheduler {
    /// Applies a user decision to a phase.
    ///
    /// Only the current phase in `awaiting_approval` can be decided; a
    /// duplicate approval of an already approved phase succeeds without
    /// side effects so retried requests stay harmless.
    pub async fn handle_approval(
        &self,
        task_id: &str,
        phase_id: &str,
        approved: bool,
        feedback: Option<String>,
    ) -> Result<ApprovalOutcome, Error> {
        let slot = self.ensure_cached(task_id).await?;

        let next_phase;
        let outcome = {
            let mut task = slot.task.lock().await;
            let index = task
                .phase_index(phase_id)
                .ok_or_else(|| Error::PhaseNotFound(phase_id.to_string()))?;

            if approved && task.phases[index].status == PhaseStatus::Approved {
                info!(
                    "[{}] Phase {} already approved; treating as duplicate",
                    task_id, phase_id
                );
                return Ok(ApprovalOutcome {
                    phase: task.phases[index].clone(),
                    task: task.clone(),
                });
            }
            if task.phases[index].status != PhaseStatus::AwaitingApproval
                || index != task.current_phase
            {
                return Err(Error::PhaseNotApprovable(phase_id.to_string()));
            }

            if approved {
                {
                    let phase = &mut task.phases[index];
                    phase.approved = true;
                    phase.status = PhaseStatus::Approved;
                    phase.user_feedback = feedback;
                }
                task.touch();
                self.persist(&task)?;
                self.publish_snapshot(EventKind::PhaseApproved, &task, Some(phase_id));
                info!("[{}] Phase {} approved by user", task_id, phase_id);
                next_phase = self.advance_or_complete(&mut task);
            } else {
                let reason = feedback.clone().unwrap_or_default();
                {
                    let phase = &mut task.phases[index];
                    phase.status = PhaseStatus::Rejected;
                    phase.user_feedback = feedback;
                }
                task.status = TaskStatus::Failed;
                task.error = Some(format!("Phase rejected: {}", reason));
                task.touch();
                self.persist(&task)?;
                self.publish_snapshot(EventKind::PhaseRejected, &task, Some(phase_id));
                self.publish_snapshot(EventKind::TaskStatusUpdated, &task, None);
                info!("[{}] Phase {} rejected by user", task_id, phase_id);
                next_phase = None;
            }

            ApprovalOutcome {
                phase: task.phases[index].clone(),
                task: task.clone(),
            }
        };

        if let Some(next) = next_phase {
            let scheduler = self.clone();
            let task_id = task_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = scheduler.start_phase(&task_id, next).await {
                    tracing::error!("[{}] Failed to start phase {}: {}", task_id, next, e);
                }
            });
        }

        Ok(outcome)
    }
}

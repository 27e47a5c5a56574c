//! Phase execution: one concurrent activity per expert, terminating in
//! the phase completion check that either surfaces the approval gate or
//! auto-advances.

use super::Scheduler;
use crate::core::status::{ExpertStatus, PhaseStatus, TaskStatus};
use crate::core::task::Task;
use crate::event::EventKind;
use crate::rpc::{CallError, WorkerRequest};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error, info, warn};

impl Scheduler {
    /// Marks a phase running and launches its experts. Worker spawns are
    /// staggered to reduce sandbox start-up contention.
    ///
    /// Boxed explicitly (rather than `async fn`) because this function and
    /// `check_phase_completion` call each other through `tokio::spawn`,
    /// which otherwise defeats the compiler's opaque-type auto-trait
    /// inference for mutually recursive async fns.
    pub(crate) fn start_phase<'a>(
        &'a self,
        task_id: &'a str,
        phase_index: usize,
    ) -> Pin<Box<dyn Future<Output = Result<(), crate::errors::Error>> + Send + 'a>> {
        Box::pin(async move {
        let slot = self.slot(task_id)?;

        let (phase_id, roles) = {
            let mut task = slot.task.lock().await;
            let total = task.phases.len();
            let phase = task
                .phases
                .get_mut(phase_index)
                .ok_or_else(|| crate::errors::Error::PhaseNotFound(format!("index {}", phase_index)))?;
            phase.status = PhaseStatus::Running;
            phase.start_time = Some(Utc::now());
            let phase_id = phase.id.clone();
            let phase_name = phase.name.clone();
            let roles: Vec<String> = phase.experts.iter().map(|e| e.role.clone()).collect();
            task.touch();
            self.persist(&task)?;
            self.publish_snapshot(EventKind::PhaseStarted, &task, Some(&phase_id));
            info!(
                "[{}] Starting phase {}/{}: {}",
                task_id,
                phase_index + 1,
                total,
                phase_name
            );
            (phase_id, roles)
        };

        // Experts in the first phase are never allowed to delegate,
        // regardless of what the plan claims.
        let can_delegate = phase_index != 0;

        for (position, role) in roles.into_iter().enumerate() {
            let scheduler = self.clone();
            let task_id = task_id.to_string();
            let phase_id = phase_id.clone();
            let stagger = self.config.expert_stagger * position as u32;
            tokio::spawn(async move {
                if !stagger.is_zero() {
                    tokio::time::sleep(stagger).await;
                }
                scheduler
                    .run_expert(&task_id, &phase_id, &role, can_delegate)
                    .await;
                scheduler.check_phase_completion(&task_id, &phase_id).await;
            });
        }
        Ok(())
        })
    }

    /// One expert's full lifecycle: announce, spawn a worker, call it,
    /// interpret the outcome, and always reclaim the sandbox.
    async fn run_expert(&self, task_id: &str, phase_id: &str, role: &str, can_delegate: bool) {
        let Ok(slot) = self.slot(task_id) else {
            return;
        };

        let (persona, instructions) = {
            let mut task = slot.task.lock().await;
            let Some(expert) = task.phase_mut(phase_id).and_then(|p| p.expert_mut(role)) else {
                warn!("[{}] Expert {} vanished from phase {}", task_id, role, phase_id);
                return;
            };
            expert.status = ExpertStatus::Running;
            let persona = expert.persona.clone();
            let instructions = expert.task.clone();
            task.touch();
            if let Err(e) = self.persist(&task) {
                error!("[{}] Failed to persist expert start: {}", task_id, e);
            }
            self.publish_snapshot(EventKind::ExpertStarted, &task, Some(phase_id));
            (persona, instructions)
        };
        info!("[{}] Starting expert: {}", task_id, role);

        let handle = match self.sandbox.spawn(&slot.cancel).await {
            Ok(handle) => handle,
            Err(e) => {
                self.finish_expert(
                    task_id,
                    phase_id,
                    role,
                    Err(format!("Error spawning worker: {}", e)),
                )
                .await;
                return;
            }
        };
        if !handle.ready {
            warn!(
                "[{}] Worker for {} not ready in time; relying on the call retry budget",
                task_id, role
            );
        }

        let request = WorkerRequest {
            task_id: format!("{}:{}", task_id, role),
            persona_prompt: persona,
            task_instructions: instructions,
            context_data: HashMap::new(),
            can_delegate,
        };
        let outcome = self
            .worker
            .call(
                &handle.address,
                request,
                self.config.expert_call_timeout,
                &slot.cancel,
            )
            .await;

        if matches!(outcome, Err(CallError::Transport(_))) {
            if let Ok(tail) = self.sandbox.logs(&handle.id) {
                debug!("[{}] Worker log tail for {}:\n{}", task_id, role, tail);
            }
        }
        if let Err(e) = self.sandbox.stop(&handle.id).await {
            warn!("[{}] Failed to stop worker for {}: {}", task_id, role, e);
        }

        let verdict = match outcome {
            Ok(reply) if !reply.sub_tasks.is_empty() => {
                if can_delegate {
                    Err(format!(
                        "UnexpectedDelegation: worker returned {} sub-tasks; delegation is not part of phased execution",
                        reply.sub_tasks.len()
                    ))
                } else {
                    Err(format!(
                        "PolicyViolation: worker returned {} sub-tasks while delegation is disabled",
                        reply.sub_tasks.len()
                    ))
                }
            }
            Ok(reply) => Ok(reply.final_content),
            Err(CallError::WorkerReported(message)) => Err(format!("AGENT ERROR: {}", message)),
            Err(e) => Err(format!("Error: {}", e)),
        };

        self.finish_expert(task_id, phase_id, role, verdict).await;
    }

    /// Records an expert's terminal state and announces it.
    async fn finish_expert(
        &self,
        task_id: &str,
        phase_id: &str,
        role: &str,
        verdict: Result<String, String>,
    ) {
        let Ok(slot) = self.slot(task_id) else {
            return;
        };
        let mut task = slot.task.lock().await;
        let Some(phase) = task.phase_mut(phase_id) else {
            return;
        };

        let kind = match verdict {
            Ok(content) => {
                let Some(expert) = phase.expert_mut(role) else {
                    return;
                };
                expert.status = ExpertStatus::Completed;
                expert.result = Some(content.clone());
                phase.results.insert(role.to_string(), content);
                info!("[{}] Expert {} completed", task_id, role);
                EventKind::ExpertCompleted
            }
            Err(text) => {
                let Some(expert) = phase.expert_mut(role) else {
                    return;
                };
                expert.status = ExpertStatus::Failed;
                expert.result = Some(text.clone());
                error!("[{}] Expert {} failed: {}", task_id, role, text);
                EventKind::ExpertFailed
            }
        };

        task.touch();
        if let Err(e) = self.persist(&task) {
            error!("[{}] Failed to persist expert outcome: {}", task_id, e);
        }
        self.publish_snapshot(kind, &task, Some(phase_id));
    }

    /// Runs after every expert terminates. Once all experts are terminal
    /// the phase closes and either waits at the approval gate or
    /// auto-advances.
    pub(crate) async fn check_phase_completion(&self, task_id: &str, phase_id: &str) {
        let Ok(slot) = self.slot(task_id) else {
            return;
        };

        let next_phase = {
            let mut task = slot.task.lock().await;
            let requires_approval = task.requires_user_approval;
            let Some(index) = task.phase_index(phase_id) else {
                return;
            };
            {
                let phase = &task.phases[index];
                if phase.status != PhaseStatus::Running || !phase.all_experts_terminal() {
                    return;
                }
            }

            {
                let phase = &mut task.phases[index];
                phase.status = PhaseStatus::Completed;
                phase.end_time = Some(Utc::now());
            }
            task.touch();
            if let Err(e) = self.persist(&task) {
                error!("[{}] Failed to persist phase completion: {}", task_id, e);
            }
            self.publish_snapshot(EventKind::PhaseCompleted, &task, Some(phase_id));
            if task.phases[index].has_failures() {
                warn!(
                    "[{}] Phase {} completed with failed experts",
                    task_id, phase_id
                );
            }

            if requires_approval {
                task.phases[index].status = PhaseStatus::AwaitingApproval;
                task.status = TaskStatus::AwaitingApproval;
                task.touch();
                if let Err(e) = self.persist(&task) {
                    error!("[{}] Failed to persist approval gate: {}", task_id, e);
                }
                self.publish_snapshot(EventKind::PhaseAwaitingApproval, &task, Some(phase_id));
                info!(
                    "[{}] Phase {} completed; awaiting user approval",
                    task_id, phase_id
                );
                None
            } else {
                task.phases[index].approved = true;
                task.phases[index].status = PhaseStatus::Approved;
                task.touch();
                if let Err(e) = self.persist(&task) {
                    error!("[{}] Failed to persist auto-approval: {}", task_id, e);
                }
                self.publish_snapshot(EventKind::PhaseApproved, &task, Some(phase_id));
                info!("[{}] Phase {} auto-approved", task_id, phase_id);
                self.advance_or_complete(&mut task)
            }
        };

        if let Some(next) = next_phase {
            let scheduler = self.clone();
            let task_id = task_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = scheduler.start_phase(&task_id, next).await {
                    error!("[{}] Failed to start phase {}: {}", task_id, next, e);
                }
            });
        }
    }

    /// Under the task lock: either step to the next phase or finish the
    /// task. Returns the index of the phase to start, if any.
    pub(super) fn advance_or_complete(&self, task: &mut Task) -> Option<usize> {
        if task.current_phase + 1 < task.phases.len() {
            task.current_phase += 1;
            task.status = TaskStatus::Running;
            task.touch();
            if let Err(e) = self.persist(task) {
                error!("[{}] Failed to persist phase advance: {}", task.id, e);
            }
            Some(task.current_phase)
        } else {
            task.status = TaskStatus::Completed;
            task.result = task.assemble_result();
            task.touch();
            if let Err(e) = self.persist(task) {
                error!("[{}] Failed to persist completion: {}", task.id, e);
            }
            self.publish_snapshot(EventKind::TaskCompleted, task, None);
            info!("[{}] All phases completed", task.id);
            None
        }
    }
}

//! Cold-start recovery: rebuild the in-memory index from the store and
//! resolve work that was in flight when the process died.
//!
//! The policy is deterministic and never reruns a partially completed
//! phase: crashed planning fails the task, crashed experts fail and the
//! phase surfaces at the approval gate with those failures visible.

use super::Scheduler;
use crate::core::status::{ExpertStatus, TaskStatus};
use crate::db::TaskRepository;
use crate::errors::Error;
use tracing::{info, warn};

impl Scheduler {
    /// Scans the store, applies the crash policy and loads every task into
    /// the cache. Returns the number of tasks loaded.
    pub async fn recover(&self) -> Result<usize, Error> {
        let stored = {
            let mut conn = self.db.get_conn();
            TaskRepository::new(&mut conn).all_tasks()?
        };
        let count = stored.len();
        let mut completion_checks = Vec::new();

        for mut task in stored {
            match task.status {
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::AwaitingApproval => {}
                TaskStatus::Pending | TaskStatus::Planning => {
                    warn!("[{}] Crashed during planning; marking failed", task.id);
                    task.status = TaskStatus::Failed;
                    task.error = Some(
                        "CrashDuringPlanning: the orchestrator restarted before a plan was produced"
                            .to_string(),
                    );
                    task.touch();
                    self.persist(&task)?;
                }
                TaskStatus::Running => {
                    let current = task.current_phase;
                    if let Some(phase) = task.phases.get_mut(current) {
                        let phase_id = phase.id.clone();
                        let mut crashed = 0;
                        for expert in phase.experts.iter_mut() {
                            if !expert.status.is_terminal() {
                                expert.status = ExpertStatus::Failed;
                                expert.result = Some(
                                    "CrashDuringExecution: the orchestrator restarted while this expert was running"
                                        .to_string(),
                                );
                                crashed += 1;
                            }
                        }
                        if crashed > 0 {
                            warn!(
                                "[{}] Crashed mid-phase; {} experts marked failed",
                                task.id, crashed
                            );
                            task.touch();
                            self.persist(&task)?;
                        }
                        completion_checks.push((task.id.clone(), phase_id));
                    }
                }
            }
            self.insert_slot(task);
        }

        // The checks run after the whole index is rebuilt so event
        // subscribers and approval calls see a consistent cache.
        for (task_id, phase_id) in completion_checks {
            self.check_phase_completion(&task_id, &phase_id).await;
        }

        info!("Recovered {} tasks from the store", count);
        Ok(count)
    }
}

//! The scheduler owns every mutation of task, phase and expert records.
//!
//! One cooperating state machine runs per task, with one concurrent
//! activity per expert inside the active phase. All of them serialize on
//! the task's mutex, which doubles as the single-writer barrier in front
//! of the store: events are published after the durable write, inside the
//! lock, so subscribers observe transitions in durable order.

mod approval;
mod phase;
mod planning;
mod recovery;

pub use approval::ApprovalOutcome;

use crate::config::OrchestratorConfig;
use crate::core::status::TaskStatus;
use crate::core::task::Task;
use crate::db::{Database, TaskRepository};
use crate::errors::Error;
use crate::event::{EventBus, EventKind, OrchestratorEvent};
use crate::rpc::WorkerClient;
use crate::sandbox::SandboxManager;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cache entry for one task: the record behind its coordination lock plus
/// the cancellation token covering all of its in-flight I/O.
#[derive(Clone)]
pub(crate) struct TaskSlot {
    pub(crate) task: Arc<Mutex<Task>>,
    pub(crate) cancel: CancellationToken,
}

impl TaskSlot {
    fn new(task: Task) -> Self {
        Self {
            task: Arc::new(Mutex::new(task)),
            cancel: CancellationToken::new(),
        }
    }
}

/// Coordinates planning, phase execution, approval gates and recovery.
#[derive(Clone)]
pub struct Scheduler {
    db: Database,
    bus: EventBus,
    sandbox: Arc<SandboxManager>,
    worker: WorkerClient,
    config: Arc<OrchestratorConfig>,
    /// In-memory index; the outer lock guards structural changes only,
    /// field updates go through each slot's task mutex.
    tasks: Arc<RwLock<HashMap<String, TaskSlot>>>,
}

impl Scheduler {
    pub fn new(db: Database, config: OrchestratorConfig) -> Self {
        let bus = EventBus::new(config.event_buffer);
        let sandbox = Arc::new(SandboxManager::new(config.sandbox.clone()));
        let worker = WorkerClient::new(&config.rpc);
        Self {
            db,
            bus,
            sandbox,
            worker,
            config: Arc::new(config),
            tasks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Accepts a new objective: the record is durable and announced before
    /// this returns, planning continues in the background.
    pub async fn submit(
        &self,
        objective: String,
        requires_user_approval: bool,
    ) -> Result<Task, Error> {
        let task = {
            let mut tasks = self.tasks.write().expect("task index lock poisoned");
            let id = Self::unique_task_id(&tasks);
            let task = Task::new(id.clone(), objective, requires_user_approval);
            tasks.insert(id, TaskSlot::new(task.clone()));
            task
        };

        if let Err(e) = self.persist(&task) {
            let mut tasks = self.tasks.write().expect("task index lock poisoned");
            tasks.remove(&task.id);
            return Err(e);
        }

        self.publish_snapshot(EventKind::TaskCreated, &task, None);
        info!("[{}] Task submitted: {}", task.id, task.task);

        let scheduler = self.clone();
        let task_id = task.id.clone();
        tokio::spawn(async move {
            scheduler.execute(task_id).await;
        });

        Ok(task)
    }

    /// Timestamp-based ids are unique enough across restarts; the suffix
    /// covers same-millisecond submissions.
    fn unique_task_id(tasks: &HashMap<String, TaskSlot>) -> String {
        let millis = Utc::now().timestamp_millis();
        let mut id = format!("task_{}", millis);
        let mut n = 1;
        while tasks.contains_key(&id) {
            id = format!("task_{}_{}", millis, n);
            n += 1;
        }
        id
    }

    /// Snapshot of one task, falling back to the store and caching the
    /// record on a hit.
    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        match self.ensure_cached(task_id).await {
            Ok(slot) => Some(slot.task.lock().await.clone()),
            Err(_) => None,
        }
    }

    /// Snapshots of every known task, newest first.
    pub async fn list_tasks(&self) -> Vec<Task> {
        let slots: Vec<TaskSlot> = {
            let tasks = self.tasks.read().expect("task index lock poisoned");
            tasks.values().cloned().collect()
        };
        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            snapshots.push(slot.task.lock().await.clone());
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    pub fn task_count(&self) -> usize {
        self.tasks.read().expect("task index lock poisoned").len()
    }

    /// Marks a task failed with the given error text. Terminal statuses
    /// are sticky, so this is a no-op on completed or failed tasks.
    pub(crate) async fn fail_task(&self, task_id: &str, error_text: String) {
        let Ok(slot) = self.slot(task_id) else {
            return;
        };
        let mut task = slot.task.lock().await;
        if task.status.is_terminal() {
            return;
        }
        task.status = TaskStatus::Failed;
        task.error = Some(error_text);
        task.touch();
        if let Err(e) = self.persist(&task) {
            error!("[{}] Failed to persist failure: {}", task_id, e);
        }
        self.publish_snapshot(EventKind::TaskStatusUpdated, &task, None);
    }

    /// Cancels all in-flight work and reclaims every sandbox. Called once
    /// on process shutdown.
    pub async fn shutdown(&self) {
        let slots: Vec<TaskSlot> = {
            let tasks = self.tasks.read().expect("task index lock poisoned");
            tasks.values().cloned().collect()
        };
        for slot in slots {
            slot.cancel.cancel();
        }
        self.sandbox.stop_all().await;
    }

    pub(crate) fn slot(&self, task_id: &str) -> Result<TaskSlot, Error> {
        self.tasks
            .read()
            .expect("task index lock poisoned")
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Cache lookup with store fallback.
    pub(crate) async fn ensure_cached(&self, task_id: &str) -> Result<TaskSlot, Error> {
        if let Ok(slot) = self.slot(task_id) {
            return Ok(slot);
        }
        let task = {
            let mut conn = self.db.get_conn();
            TaskRepository::new(&mut conn)
                .get_task(task_id)?
                .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?
        };
        Ok(self.insert_slot(task))
    }

    /// Registers a task in the index, keeping any slot a concurrent caller
    /// installed first.
    pub(crate) fn insert_slot(&self, task: Task) -> TaskSlot {
        let mut tasks = self.tasks.write().expect("task index lock poisoned");
        tasks
            .entry(task.id.clone())
            .or_insert_with(|| TaskSlot::new(task))
            .clone()
    }

    /// Durable write of the full task record.
    pub(crate) fn persist(&self, task: &Task) -> Result<(), Error> {
        let mut conn = self.db.get_conn();
        TaskRepository::new(&mut conn).upsert_task(task)
    }

    /// Publishes an event carrying the freshly persisted task snapshot.
    /// Callers invoke this after `persist`, still holding the task lock,
    /// so event order matches durable order.
    pub(crate) fn publish_snapshot(&self, kind: EventKind, task: &Task, phase_id: Option<&str>) {
        let payload = serde_json::to_value(task).unwrap_or(serde_json::Value::Null);
        self.bus
            .publish(OrchestratorEvent::new(kind, &task.id, phase_id, payload));
    }
}

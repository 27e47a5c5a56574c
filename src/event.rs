//! Typed state-change events and the fan-out bus.
//!
//! Producers push onto an unbounded channel and never wait on subscribers;
//! a dedicated fan-out task drains that channel into one broadcast topic
//! per task plus a global topic. Subscribers that fall behind the bounded
//! topic buffer observe a lag and are expected to re-fetch a snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Kinds of events published by the scheduler, plus the synthetic
/// `snapshot` and `lagged` kinds emitted on the subscription side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskStatusUpdated,
    PlanGenerated,
    PhaseStarted,
    PhaseCompleted,
    PhaseAwaitingApproval,
    PhaseApproved,
    PhaseRejected,
    ExpertStarted,
    ExpertCompleted,
    ExpertFailed,
    TaskCompleted,
    Snapshot,
    Lagged,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::TaskCreated => "task_created",
            EventKind::TaskStatusUpdated => "task_status_updated",
            EventKind::PlanGenerated => "plan_generated",
            EventKind::PhaseStarted => "phase_started",
            EventKind::PhaseCompleted => "phase_completed",
            EventKind::PhaseAwaitingApproval => "phase_awaiting_approval",
            EventKind::PhaseApproved => "phase_approved",
            EventKind::PhaseRejected => "phase_rejected",
            EventKind::ExpertStarted => "expert_started",
            EventKind::ExpertCompleted => "expert_completed",
            EventKind::ExpertFailed => "expert_failed",
            EventKind::TaskCompleted => "task_completed",
            EventKind::Snapshot => "snapshot",
            EventKind::Lagged => "lagged",
        };
        write!(f, "{}", s)
    }
}

/// One state-change notification for a task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Usually the freshly persisted task snapshot
    pub payload: Value,
}

impl OrchestratorEvent {
    pub fn new(kind: EventKind, task_id: &str, phase_id: Option<&str>, payload: Value) -> Self {
        Self {
            kind,
            task_id: task_id.to_string(),
            phase_id: phase_id.map(|p| p.to_string()),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Fan-out bus with one topic per task id plus a global topic.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<OrchestratorEvent>,
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<OrchestratorEvent>>>>,
    global: broadcast::Sender<OrchestratorEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates the bus and spawns its fan-out task. `capacity` bounds each
    /// subscriber's buffer; slow subscribers lag rather than block anyone.
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OrchestratorEvent>();
        let topics: Arc<RwLock<HashMap<String, broadcast::Sender<OrchestratorEvent>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (global, _) = broadcast::channel(capacity.max(1));

        let fanout_topics = Arc::clone(&topics);
        let fanout_global = global.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let _ = fanout_global.send(event.clone());
                let topic = {
                    let topics = fanout_topics.read().expect("event topics lock poisoned");
                    topics.get(&event.task_id).cloned()
                };
                if let Some(topic) = topic {
                    let _ = topic.send(event);
                }
            }
        });

        Self {
            tx,
            topics,
            global,
            capacity: capacity.max(1),
        }
    }

    /// Queues an event for delivery. Never blocks the caller.
    pub fn publish(&self, event: OrchestratorEvent) {
        debug!("queueing {} for {}", event.kind, event.task_id);
        let _ = self.tx.send(event);
    }

    /// Subscribes to one task's ordered event stream.
    pub fn subscribe_task(&self, task_id: &str) -> broadcast::Receiver<OrchestratorEvent> {
        let mut topics = self.topics.write().expect("event topics lock poisoned");
        topics
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribes to events across all tasks.
    pub fn subscribe_all(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.global.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::{timeout, Duration};

    fn event(kind: EventKind, task_id: &str, n: u64) -> OrchestratorEvent {
        OrchestratorEvent::new(kind, task_id, None, serde_json::json!({ "seq": n }))
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe_task("task_a");

        for n in 0..5 {
            bus.publish(event(EventKind::TaskStatusUpdated, "task_a", n));
        }

        for n in 0..5 {
            let ev = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            assert_eq!(ev.payload["seq"], n);
        }
    }

    #[tokio::test]
    async fn topics_are_isolated_per_task() {
        let bus = EventBus::new(16);
        let mut rx_a = bus.subscribe_task("task_a");
        let mut rx_b = bus.subscribe_task("task_b");

        bus.publish(event(EventKind::TaskCreated, "task_b", 1));

        let ev = timeout(Duration::from_secs(1), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ev.task_id, "task_b");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn global_topic_sees_every_task() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe_all();

        bus.publish(event(EventKind::TaskCreated, "task_a", 1));
        bus.publish(event(EventKind::TaskCreated, "task_b", 2));

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.task_id, "task_a");
        assert_eq!(second.task_id, "task_b");
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe_task("task_a");

        // Publishing far past the buffer must not block the producer.
        for n in 0..20 {
            bus.publish(event(EventKind::TaskStatusUpdated, "task_a", n));
        }
        // Give the fan-out task time to drain the queue.
        tokio::time::sleep(Duration::from_millis(50)).await;

        match rx.recv().await {
            Err(RecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lag, got {:?}", other),
        }
        // After the lag marker the newest events are still readable.
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.payload["seq"], 18);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let ev = event(EventKind::PhaseAwaitingApproval, "task_a", 1);
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["type"], "phase_awaiting_approval");
        assert_eq!(value["taskId"], "task_a");
        assert!(value.get("phaseId").is_none());
    }
}

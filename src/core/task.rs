use super::status::{ExpertStatus, PhaseStatus, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A user-submitted objective and all state tracking its execution.
///
/// The record is the unit of persistence: phases and experts are embedded
/// and the whole task is written atomically on every transition. Fields
/// that are not part of this schema survive a load/store cycle through
/// the flattened `extra` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Globally unique task identifier
    pub id: String,
    /// Original objective text as submitted by the user
    pub task: String,
    /// Current status of the task
    pub status: TaskStatus,
    /// Final result text, populated when the task completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Last error text, populated when the task fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ordered phases; append-only once planning completes
    #[serde(default)]
    pub phases: Vec<Phase>,
    /// Index of the phase currently executing or awaiting approval
    #[serde(default)]
    pub current_phase: usize,
    /// When false the scheduler auto-advances through approval gates
    pub requires_user_approval: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// An ordered stage of a task, containing experts that run in parallel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    /// Stable identifier assigned by the planner (e.g. `phase_1_planning`)
    pub id: String,
    /// Display name
    pub name: String,
    /// What this phase is meant to produce
    pub description: String,
    #[serde(default)]
    pub status: PhaseStatus,
    /// Experts executed concurrently within this phase
    #[serde(default)]
    pub experts: Vec<Expert>,
    /// Per-role result text, populated as experts complete
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_feedback: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A leaf unit of work executed by one sandboxed worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expert {
    /// Role string, unique within its phase
    pub role: String,
    /// Description of the expert's domain
    pub expertise: String,
    /// System prompt handed to the worker
    pub persona: String,
    /// Task instructions handed to the worker
    pub task: String,
    #[serde(default)]
    pub status: ExpertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Task {
    /// Creates a new task in `pending` state for the given objective
    pub fn new(id: String, objective: String, requires_user_approval: bool) -> Self {
        let now = Utc::now();
        Self {
            id,
            task: objective,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            phases: Vec::new(),
            current_phase: 0,
            requires_user_approval,
            created_at: now,
            updated_at: now,
            extra: serde_json::Map::new(),
        }
    }

    /// Bumps `updated_at`; called before every durable write
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn phase(&self, phase_id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    pub fn phase_mut(&mut self, phase_id: &str) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.id == phase_id)
    }

    /// Position of a phase in the plan order
    pub fn phase_index(&self, phase_id: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.id == phase_id)
    }

    /// Builds the final result text from the last phase's per-role results
    pub fn assemble_result(&self) -> Option<String> {
        let last = self.phases.last()?;
        if last.results.is_empty() {
            return None;
        }
        let mut out = String::new();
        for (role, content) in &last.results {
            out.push_str(&format!("### {}\n{}\n\n", role, content));
        }
        Some(out.trim_end().to_string())
    }
}

impl Phase {
    /// True once every expert reached `completed` or `failed`
    pub fn all_experts_terminal(&self) -> bool {
        self.experts.iter().all(|e| e.status.is_terminal())
    }

    pub fn has_failures(&self) -> bool {
        self.experts
            .iter()
            .any(|e| e.status == ExpertStatus::Failed)
    }

    pub fn expert_mut(&mut self, role: &str) -> Option<&mut Expert> {
        self.experts.iter_mut().find(|e| e.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        let mut task = Task::new(
            "task_1".to_string(),
            "Design an auth system".to_string(),
            true,
        );
        task.phases.push(Phase {
            id: "phase_1_planning".to_string(),
            name: "Planning".to_string(),
            description: "Define the architecture".to_string(),
            status: PhaseStatus::Running,
            experts: vec![Expert {
                role: "Lead Architect".to_string(),
                expertise: "System design".to_string(),
                persona: "You are a lead architect.".to_string(),
                task: "Produce an architecture document".to_string(),
                status: ExpertStatus::Completed,
                result: Some("done".to_string()),
                extra: serde_json::Map::new(),
            }],
            results: BTreeMap::from([("Lead Architect".to_string(), "done".to_string())]),
            start_time: Some(Utc::now()),
            end_time: None,
            approved: false,
            user_feedback: None,
            extra: serde_json::Map::new(),
        });
        task
    }

    #[test]
    fn serde_round_trip_is_identical() {
        let task = sample_task();
        let json = serde_json::to_string(&task).unwrap();
        let reloaded: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(json, serde_json::to_string(&reloaded).unwrap());
    }

    #[test]
    fn unknown_fields_are_preserved_on_rewrite() {
        let mut value = serde_json::to_value(sample_task()).unwrap();
        value["someFutureField"] = serde_json::json!({"nested": [1, 2, 3]});
        value["phases"][0]["phaseAnnotations"] = serde_json::json!("keep-me");

        let reloaded: Task = serde_json::from_value(value).unwrap();
        let rewritten = serde_json::to_value(&reloaded).unwrap();

        assert_eq!(rewritten["someFutureField"]["nested"][2], 3);
        assert_eq!(rewritten["phases"][0]["phaseAnnotations"], "keep-me");
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let value = serde_json::to_value(sample_task()).unwrap();
        assert!(value.get("currentPhase").is_some());
        assert!(value.get("requiresUserApproval").is_some());
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["status"], "pending");
        assert_eq!(value["phases"][0]["experts"][0]["status"], "completed");
    }

    #[test]
    fn all_experts_terminal_tracks_statuses() {
        let mut task = sample_task();
        assert!(task.phases[0].all_experts_terminal());

        task.phases[0].experts.push(Expert {
            role: "Reviewer".to_string(),
            expertise: "Review".to_string(),
            persona: "p".to_string(),
            task: "t".to_string(),
            status: ExpertStatus::Running,
            result: None,
            extra: serde_json::Map::new(),
        });
        assert!(!task.phases[0].all_experts_terminal());
        assert!(!task.phases[0].has_failures());

        task.phases[0].experts[1].status = ExpertStatus::Failed;
        assert!(task.phases[0].all_experts_terminal());
        assert!(task.phases[0].has_failures());
    }

    #[test]
    fn assemble_result_joins_last_phase_results() {
        let task = sample_task();
        let result = task.assemble_result().unwrap();
        assert!(result.contains("### Lead Architect"));
        assert!(result.contains("done"));

        let empty = Task::new("task_2".to_string(), "x".to_string(), true);
        assert!(empty.assemble_result().is_none());
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Represents the current status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has been accepted but planning has not started
    Pending,
    /// The planner worker is producing a phased plan
    Planning,
    /// A phase is executing
    Running,
    /// The current phase finished and waits for a user decision
    AwaitingApproval,
    /// Every phase was approved
    Completed,
    /// Task failed with an error message
    Failed,
}

impl TaskStatus {
    /// Terminal statuses are sticky: no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Represents the current status of a phase within a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    AwaitingApproval,
    Approved,
    Rejected,
    Completed,
}

/// Represents the current status of an expert within a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExpertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExpertStatus::Completed | ExpertStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::Running => "running",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    /// Unknown status values are rejected rather than coerced to a default,
    /// so a corrupted record cannot silently re-enter the scheduler.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "planning" => Ok(TaskStatus::Planning),
            "running" => Ok(TaskStatus::Running),
            "awaiting_approval" => Ok(TaskStatus::AwaitingApproval),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status '{}'", other)),
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::AwaitingApproval => "awaiting_approval",
            PhaseStatus::Approved => "approved",
            PhaseStatus::Rejected => "rejected",
            PhaseStatus::Completed => "completed",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ExpertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExpertStatus::Pending => "pending",
            ExpertStatus::Running => "running",
            ExpertStatus::Completed => "completed",
            ExpertStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_round_trips_through_display() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Planning,
            TaskStatus::Running,
            TaskStatus::AwaitingApproval,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>(), Ok(status));
        }
    }

    #[test]
    fn unknown_task_status_is_rejected() {
        assert!("paused".parse::<TaskStatus>().is_err());
        assert!("".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn unknown_serialized_status_is_rejected() {
        let err = serde_json::from_str::<PhaseStatus>("\"archived\"");
        assert!(err.is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::AwaitingApproval.is_terminal());
        assert!(ExpertStatus::Failed.is_terminal());
        assert!(!ExpertStatus::Running.is_terminal());
    }
}

use crate::core::{Task, TaskStatus};
use crate::errors::Error;
use crate::schema::tasks;
use diesel::{AsChangeset, Identifiable, Insertable, Queryable};
use serde::{Deserialize, Serialize};

/// One persisted task record. The payload column carries the complete
/// serialized [`Task`] (phases embedded), so a row round-trips the record
/// without joins.
#[derive(
    Debug, Clone, Serialize, Deserialize, Queryable, Identifiable, AsChangeset, Insertable,
)]
#[diesel(table_name = tasks, primary_key(task_id))]
pub struct TaskRow {
    /// Task identifier, the store key
    pub task_id: String,
    /// Current status, duplicated out of the payload for filtering
    pub status: String,
    /// Full serialized task record
    pub payload: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskRow {
    pub fn from_task(task: &Task) -> Result<Self, Error> {
        Ok(TaskRow {
            task_id: task.id.clone(),
            status: task.status.to_string(),
            payload: serde_json::to_string(task)?,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        })
    }

    /// Decodes the payload, rejecting records whose denormalized status
    /// column disagrees with it or carries an unknown value.
    pub fn into_task(self) -> Result<Task, Error> {
        let task: Task = serde_json::from_str(&self.payload)?;
        let column: TaskStatus = self.status.parse().map_err(Error::CorruptRecord)?;
        if column != task.status {
            return Err(Error::CorruptRecord(format!(
                "status column '{}' does not match payload status '{}'",
                self.status, task.status
            )));
        }
        Ok(task)
    }
}

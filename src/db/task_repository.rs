use crate::core::Task;
use crate::db::models::TaskRow;
use crate::errors::Error;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

/// Repository for task records in the SQLite store.
///
/// The store is a key/value of task id to serialized record. Writers
/// serialize per task through the scheduler's task lock; the repository
/// itself only guarantees that each operation is atomic.
pub struct TaskRepository<'a> {
    /// Database connection
    pub conn: &'a mut SqliteConnection,
}

impl<'a> TaskRepository<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        TaskRepository { conn }
    }

    /// Inserts or replaces the record for `task.id`.
    ///
    /// # Errors
    ///
    /// Returns an Error if serialization or the write fails
    pub fn upsert_task(&mut self, task: &Task) -> Result<(), Error> {
        use crate::schema::tasks;

        let row = TaskRow::from_task(task)?;
        diesel::replace_into(tasks::table)
            .values(&row)
            .execute(self.conn)?;
        Ok(())
    }

    /// Retrieves a single task by its id, or None when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns an Error if the read or payload decoding fails
    pub fn get_task(&mut self, the_task_id: &str) -> Result<Option<Task>, Error> {
        use crate::schema::tasks::dsl::*;

        let row = tasks
            .filter(task_id.eq(the_task_id))
            .first::<TaskRow>(self.conn)
            .optional()?;

        row.map(TaskRow::into_task).transpose()
    }

    /// Full scan of every stored task, newest first. Used for warm-start
    /// recovery and the task listing.
    ///
    /// # Errors
    ///
    /// Returns an Error if the read or payload decoding fails
    pub fn all_tasks(&mut self) -> Result<Vec<Task>, Error> {
        use crate::schema::tasks::dsl::*;

        let rows = tasks
            .order_by(created_at.desc())
            .load::<TaskRow>(self.conn)?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Removes the record for `the_task_id`; removing an absent key is not
    /// an error.
    pub fn delete_task(&mut self, the_task_id: &str) -> Result<(), Error> {
        use crate::schema::tasks::dsl::*;

        diesel::delete(tasks.filter(task_id.eq(the_task_id))).execute(self.conn)?;
        Ok(())
    }
}

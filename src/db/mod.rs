mod models;
mod task_repository;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

pub use models::*;
pub use task_repository::*;

/// Schema applied idempotently when the store is opened. The payload
/// column holds the full serialized task record; status is duplicated for
/// filtering without decoding.
const INIT_SQL: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;
CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY NOT NULL,
    status TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<Pool<ConnectionManager<SqliteConnection>>>,
}

impl Database {
    /// Opens (creating if needed) the task store. A store that cannot be
    /// opened is a fatal init failure, so this panics rather than limping.
    pub fn new(db_path: &str) -> Self {
        let manager = ConnectionManager::<SqliteConnection>::new(db_path);
        let pool = Pool::builder()
            .build(manager)
            .expect("Failed to create pool.");

        pool.get()
            .expect("Failed to get connection")
            .batch_execute(INIT_SQL)
            .expect("Failed to initialize task store schema");

        Database {
            pool: Arc::new(pool),
        }
    }

    pub fn get_conn(&self) -> PooledConnection<ConnectionManager<SqliteConnection>> {
        self.pool.get().expect("Failed to get connection")
    }
}

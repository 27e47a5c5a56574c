use diesel::result::Error as DieselError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Diesel error: {0}")]
    DieselError(#[from] DieselError),
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Corrupt task record: {0}")]
    CorruptRecord(String),
    #[error("Sandbox error: {0}")]
    SandboxError(String),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("Phase not found: {0}")]
    PhaseNotFound(String),
    #[error("Phase {0} is not awaiting approval")]
    PhaseNotApprovable(String),
}

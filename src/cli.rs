use clap::Parser;

/// Command line interface for the orchestrator
#[derive(Parser)]
pub struct Cli {
    /// Port the HTTP API listens on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Path to the SQLite task store
    #[arg(long, env = "DATABASE_PATH", default_value = "maestro.db")]
    pub database_path: String,

    /// Command used to launch a worker process; the allocated port is
    /// appended as the final argument
    #[arg(long, env = "WORKER_COMMAND", default_value = crate::constants::DEFAULT_WORKER_COMMAND)]
    pub worker_command: String,

    /// Sets the logging verbosity level for the application
    /// Possible values: "error", "warn", "info", "debug", "trace"
    /// Default: "info"
    #[arg(long, default_value_t = String::from("info"))]
    pub logging_level: String,
}

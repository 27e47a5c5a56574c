//! Main entry point for the orchestrator.
//!
//! Initializes logging, loads environment variables, opens the task
//! store, recovers persisted work and starts the HTTP server.

use clap::Parser;
use maestro::config::OrchestratorConfig;
use maestro::core::Scheduler;
use maestro::db::Database;
use maestro::{api, cli, utils};
use tracing::warn;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::try_parse().expect("Failed to parse CLI arguments");
    utils::init_logging(&cli.logging_level);

    if let Err(e) = dotenvy::dotenv() {
        warn!("Failed to load .env file: {}", e);
    }

    let config = OrchestratorConfig::from_cli(&cli);
    let database = Database::new(&cli.database_path);

    let scheduler = Scheduler::new(database, config);
    scheduler
        .recover()
        .await
        .expect("Failed to recover persisted tasks");

    api::launch_server(cli.port, scheduler)
        .await
        .expect("Server failed to start");
}

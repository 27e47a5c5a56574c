use crate::api::routes;
use crate::core::Scheduler;
use std::net::SocketAddr;
use tracing::info;

/// Starts and runs the HTTP server until ctrl-c, then reclaims every
/// sandboxed worker.
///
/// # Arguments
/// * `port` - Port number to listen on for incoming HTTP connections
/// * `scheduler` - The scheduler handling all submitted work
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Ok on clean shutdown,
///   Error if the listener cannot be bound
pub async fn launch_server(
    port: u16,
    scheduler: Scheduler,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = routes::app(scheduler.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down; stopping all workers");
    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

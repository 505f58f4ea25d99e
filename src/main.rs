/// Scanflow: continuous flow execution engine
///
/// Main entry point for the scanflow server. Loads configuration from the
/// environment and starts the control API with the session runtime.

use scanflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Session control at /api/flows/{id}/*
/// - Validation at /api/triggers/validate and /api/flows/{id}/parameters/validate
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}

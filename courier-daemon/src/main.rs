//! Courier binary entry point: parses CLI flags, builds the channel
//! registry from the compiled-in demo handlers, and runs the process under
//! the standard Courier service lifecycle.

use std::sync::Arc;

use clap::Parser;
use courier::config::{Cli, CourierConfig};
use courier::registry::Registry;
use courier::service::CourierApp;
use courier_core::{CourierRuntime, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = courier_telemetry::init("courier").map_err(|e| {
        courier_core::CourierError::Internal(format!("telemetry init failed: {e}"))
    })?;

    let cli = Cli::parse();
    let mut config = CourierConfig::from_env();
    if let Some(path) = &cli.config {
        config = config.with_file_overlay(path)?;
    }

    let registry = Registry::builder()
        .register(Arc::new(courier::adapters::dk::DkHandler::default()))
        .register(Arc::new(courier::adapters::fba::FbaHandler::default()))
        .build();

    let backend = Arc::new(courier_backend_memory::InMemoryBackend::new());

    let app = Arc::new(CourierApp::new(config, registry, backend));
    CourierRuntime::run(app).await
}

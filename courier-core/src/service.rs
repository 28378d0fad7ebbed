//! Service lifecycle infrastructure shared by Courier binaries

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::Result;

/// Health status for liveness probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub service_id: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Readiness status for readiness probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub available: bool,
    pub latency_ms: Option<u64>,
}

/// Standard trait every Courier process implements.
///
/// `start` receives the process-wide shutdown token: the router and sender
/// each derive a child token from it so a single cancellation fans out to
/// every in-flight request and send without a second signal path.
#[async_trait]
pub trait CourierService: Send + Sync + 'static {
    fn service_id(&self) -> &'static str;

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    async fn health(&self) -> HealthStatus;

    async fn ready(&self) -> ReadinessStatus;

    /// Graceful shutdown, called once `start`'s task has had a chance to drain.
    async fn shutdown(&self) -> Result<()>;

    async fn start(&self, shutdown: CancellationToken) -> Result<()>;
}

/// Standard process bootstrap: run a service until SIGINT/SIGTERM, then
/// cancel its shutdown token and wait for the service task to drain.
pub struct CourierRuntime {
    config: ServiceConfig,
    start_time: std::time::Instant,
}

impl CourierRuntime {
    pub fn new() -> Result<Self> {
        let config = ServiceConfig::from_env()?;
        Ok(Self {
            config,
            start_time: std::time::Instant::now(),
        })
    }

    pub async fn run<S: CourierService>(service: Arc<S>) -> Result<()> {
        let runtime = Self::new()?;

        info!(
            service_id = service.service_id(),
            version = service.version(),
            "Starting Courier process"
        );

        let shutdown_token = CancellationToken::new();

        let service_clone = service.clone();
        let child_token = shutdown_token.clone();
        let service_handle = tokio::spawn(async move {
            if let Err(e) = service_clone.start(child_token).await {
                tracing::error!("Service error: {}", e);
            }
        });

        Self::wait_for_shutdown().await;
        info!("Shutdown signal received, draining in-flight work...");
        shutdown_token.cancel();

        let grace = tokio::time::Duration::from_secs(30);
        if tokio::time::timeout(grace, service_handle).await.is_err() {
            warn!("Service did not drain within the shutdown grace period");
        }

        if let Err(e) = service.shutdown().await {
            warn!("Error during shutdown: {}", e);
        }

        info!(
            service_name = %runtime.config.service_name,
            uptime_seconds = runtime.start_time.elapsed().as_secs(),
            "Courier process stopped"
        );

        Ok(())
    }

    async fn wait_for_shutdown() {
        let ctrl_c = async {
            signal::ctrl_c().await.expect("failed to listen for ctrl-c");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to listen for SIGTERM")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }
}

impl Default for CourierRuntime {
    fn default() -> Self {
        Self::new().expect("failed to create Courier runtime")
    }
}

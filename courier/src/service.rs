//! Process wiring: builds the registry, backend, router, and sender, and
//! exposes them through the `CourierService` lifecycle contract so
//! `CourierRuntime` can run this binary the same way it would run any other
//! Courier process.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{CourierService, DependencyStatus, HealthStatus, ReadinessStatus};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::Backend;
use crate::config::CourierConfig;
use crate::registry::Registry;
use crate::router::{self, AppState};
use crate::sender::{RetryPolicy, Sender};

pub struct CourierApp {
    config: Arc<CourierConfig>,
    registry: Arc<Registry>,
    backend: Arc<dyn Backend>,
    http: reqwest::Client,
    start_time: std::time::Instant,
}

impl CourierApp {
    pub fn new(config: CourierConfig, registry: Registry, backend: Arc<dyn Backend>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            backend,
            http: reqwest::Client::new(),
            start_time: std::time::Instant::now(),
        }
    }
}

#[async_trait]
impl CourierService for CourierApp {
    fn service_id(&self) -> &'static str {
        "courier"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        let handlers: Vec<_> = self.registry.iter().collect();
        ReadinessStatus {
            ready: !handlers.is_empty(),
            dependencies: handlers
                .into_iter()
                .map(|h| DependencyStatus {
                    name: h.channel_name().to_string(),
                    available: true,
                    latency_ms: None,
                })
                .collect(),
        }
    }

    async fn shutdown(&self) -> courier_core::Result<()> {
        info!("courier shutting down");
        Ok(())
    }

    async fn start(&self, shutdown: CancellationToken) -> courier_core::Result<()> {
        let retry_policy = RetryPolicy {
            base: std::time::Duration::from_secs(self.config.default_backoff_secs),
            ..RetryPolicy::default()
        };

        let (sender, sender_handle) = Sender::new(
            self.backend.clone(),
            self.registry.clone(),
            self.http.clone(),
            self.config.default_channel_concurrency,
            self.config.default_channel_rate_per_second,
            retry_policy,
            shutdown.child_token(),
        );

        let pool_size = self.config.sender_pool_size;
        let sender_task = tokio::spawn(sender.run(pool_size));

        let state = AppState {
            registry: self.registry.clone(),
            backend: self.backend.clone(),
            config: self.config.clone(),
            http: self.http.clone(),
            sender: sender_handle,
        };

        let app = router::build(state);
        let listener = match tokio::net::TcpListener::bind(&self.config.bind_address).await {
            Ok(listener) => listener,
            Err(e) => return Err(courier_core::CourierError::Network(e.to_string())),
        };

        info!(bind = %self.config.bind_address, "courier listening");

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());
        if let Err(e) = server.await {
            tracing::error!(error = %e, "http server exited with error");
        }

        let _ = sender_task.await;
        Ok(())
    }
}

//! Generic service-wide configuration shared by the runtime bootstrap.
//!
//! Individual binaries (e.g. `courier`) layer their own, richer config
//! struct on top of this one rather than extending it — see
//! `courier::config::CourierConfig`.

use crate::error::{CourierError, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub log_level: String,
    pub enable_telemetry: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "courier".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            enable_telemetry: env::var("ENABLE_TELEMETRY")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .map_err(|e| CourierError::Config(format!("Invalid ENABLE_TELEMETRY: {}", e)))?,
        })
    }
}

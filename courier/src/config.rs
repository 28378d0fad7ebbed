//! Process-wide configuration: environment first, `--config <path>` file
//! overlaid on top.

use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "courier", about = "Messaging gateway between providers and the flow backend")]
pub struct Cli {
    /// Path to an optional TOML file overlaying environment-derived config.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct FileOverlay {
    bind_address: Option<String>,
    base_domain: Option<String>,
    max_body_bytes: Option<usize>,
    action_timeout_secs: Option<u64>,
    sender_pool_size: Option<usize>,
    default_backoff_secs: Option<u64>,
    dedup_window_secs: Option<u64>,
    default_channel_concurrency: Option<usize>,
    default_channel_rate_per_second: Option<u32>,
    enable_fb_ref_swap: Option<bool>,
    global_secrets: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct CourierConfig {
    pub bind_address: String,
    /// Public base domain handlers use to compose webhook callback URLs for
    /// providers that register one at channel-creation time.
    pub base_domain: String,
    pub max_body_bytes: usize,
    /// Upper bound on how long one inbound action may run before the router
    /// aborts it and returns a 504.
    pub action_timeout_secs: u64,
    /// Worker count for the outbound Sender pool; defaults to
    /// `2 * available_parallelism()` when unset.
    pub sender_pool_size: usize,
    pub default_backoff_secs: u64,
    pub dedup_window_secs: u64,
    /// Fallback per-channel concurrent-send cap (§4.6's "default 3 concurrent
    /// sends per channel"), overridden by a channel's own
    /// `max_concurrent_sends` config value when present.
    pub default_channel_concurrency: usize,
    /// Fallback per-channel send rate, overridden by a channel's own
    /// `rate_limit_per_second` config value (e.g. WhatsApp Cloud's 80 msg/s).
    pub default_channel_rate_per_second: u32,
    pub enable_fb_ref_swap: bool,
    /// Secrets scrubbed from every ChannelLog regardless of which handler
    /// produced it (per-handler secrets are scrubbed additionally; see
    /// `ChannelHandler::redacted_keys`).
    pub global_secrets: Vec<String>,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            base_domain: "localhost:8080".to_string(),
            max_body_bytes: 1024 * 1024,
            action_timeout_secs: 30,
            sender_pool_size: 2 * std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            default_backoff_secs: 30,
            dedup_window_secs: 24 * 3600,
            default_channel_concurrency: 3,
            default_channel_rate_per_second: 10,
            enable_fb_ref_swap: false,
            global_secrets: Vec::new(),
        }
    }
}

impl CourierConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: std::env::var("COURIER_BIND_ADDRESS").unwrap_or(defaults.bind_address),
            base_domain: std::env::var("COURIER_BASE_DOMAIN").unwrap_or(defaults.base_domain),
            max_body_bytes: std::env::var("COURIER_MAX_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_body_bytes),
            action_timeout_secs: std::env::var("COURIER_ACTION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.action_timeout_secs),
            sender_pool_size: std::env::var("COURIER_SENDER_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sender_pool_size),
            default_backoff_secs: std::env::var("COURIER_DEFAULT_BACKOFF_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_backoff_secs),
            dedup_window_secs: std::env::var("COURIER_DEDUP_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.dedup_window_secs),
            default_channel_concurrency: std::env::var("COURIER_DEFAULT_CHANNEL_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_channel_concurrency),
            default_channel_rate_per_second: std::env::var("COURIER_DEFAULT_CHANNEL_RATE_PER_SECOND")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_channel_rate_per_second),
            enable_fb_ref_swap: std::env::var("COURIER_ENABLE_FB_REF_SWAP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.enable_fb_ref_swap),
            global_secrets: std::env::var("COURIER_GLOBAL_SECRETS")
                .map(|v| v.split(',').map(str::to_string).filter(|s| !s.is_empty()).collect())
                .unwrap_or(defaults.global_secrets),
        }
    }

    /// Overlays a TOML file's values on top of the environment-derived
    /// config, for settings ops prefers to keep in version control.
    pub fn with_file_overlay(mut self, path: &std::path::Path) -> Result<Self, courier_core::CourierError> {
        let contents = std::fs::read_to_string(path)?;
        let overlay: FileOverlay = toml::from_str(&contents)
            .map_err(|e| courier_core::CourierError::Config(e.to_string()))?;

        if let Some(v) = overlay.bind_address { self.bind_address = v; }
        if let Some(v) = overlay.base_domain { self.base_domain = v; }
        if let Some(v) = overlay.max_body_bytes { self.max_body_bytes = v; }
        if let Some(v) = overlay.action_timeout_secs { self.action_timeout_secs = v; }
        if let Some(v) = overlay.sender_pool_size { self.sender_pool_size = v; }
        if let Some(v) = overlay.default_backoff_secs { self.default_backoff_secs = v; }
        if let Some(v) = overlay.dedup_window_secs { self.dedup_window_secs = v; }
        if let Some(v) = overlay.default_channel_concurrency { self.default_channel_concurrency = v; }
        if let Some(v) = overlay.default_channel_rate_per_second { self.default_channel_rate_per_second = v; }
        if let Some(v) = overlay.enable_fb_ref_swap { self.enable_fb_ref_swap = v; }
        if let Some(v) = overlay.global_secrets { self.global_secrets = v; }
        Ok(self)
    }

    pub fn dedup_window_for(&self, channel_config: &HashMap<String, serde_json::Value>) -> u64 {
        channel_config
            .get("dedup_window_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.dedup_window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sender_pool_size_is_positive() {
        assert!(CourierConfig::default().sender_pool_size > 0);
    }

    #[test]
    fn channel_override_takes_precedence_over_default() {
        let config = CourierConfig::default();
        let mut channel_config = HashMap::new();
        channel_config.insert("dedup_window_secs".to_string(), serde_json::json!(60));
        assert_eq!(config.dedup_window_for(&channel_config), 60);
        assert_eq!(config.dedup_window_for(&HashMap::new()), config.dedup_window_secs);
    }
}

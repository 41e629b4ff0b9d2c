//! Client configuration.
//!
//! Loading flow mirrors the rest of the application's settings:
//! compiled defaults, optionally overlaid by a JSON file, with
//! `TASKHUB_*` environment variables taking highest priority.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default broker endpoint.
pub const DEFAULT_BROKER_URL: &str = "ws://127.0.0.1:8080/ws";
/// Default reconnect attempt ceiling.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// Default linear backoff unit in milliseconds.
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 3000;
/// Default heartbeat period in milliseconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 20_000;
/// Default presence snapshot request debounce in milliseconds.
pub const DEFAULT_STATUS_DEBOUNCE_MS: u64 = 3000;
/// Default settle delay after connect / sync in milliseconds.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
/// Default notification dedup window in milliseconds.
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 3000;
/// Default dedup record retention in milliseconds.
pub const DEFAULT_DEDUP_RETENTION_MS: u64 = 600_000;
/// Default local event bus capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file was not valid JSON for [`RealtimeConfig`].
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for the realtime client.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeConfig {
    /// Broker WebSocket endpoint.
    pub broker_url: String,
    /// Reconnect attempt ceiling before giving up.
    pub max_reconnect_attempts: u32,
    /// Linear backoff unit: retry `n` waits `n * backoff` (not
    /// exponential — retry timing is observable behavior).
    pub reconnect_backoff_ms: u64,
    /// Period between online re-announcements while connected.
    pub heartbeat_interval_ms: u64,
    /// Minimum spacing between presence snapshot requests.
    pub status_debounce_ms: u64,
    /// Delay after connect before the snapshot request and heartbeat
    /// start, giving subscriptions time to land.
    pub settle_delay_ms: u64,
    /// Window during which an identical notification is suppressed.
    pub dedup_window_ms: u64,
    /// Age after which dedup records are purged.
    pub dedup_retention_ms: u64,
    /// Capacity of the local event broadcast channel.
    pub event_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            status_debounce_ms: DEFAULT_STATUS_DEBOUNCE_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            dedup_retention_ms: DEFAULT_DEDUP_RETENTION_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RealtimeConfig {
    /// Load configuration from a JSON file, falling back to defaults
    /// when the file does not exist, then apply env overrides.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            debug!(?path, "loading realtime config from file");
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            debug!(?path, "realtime config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `TASKHUB_*` environment variable overrides. Every config
    /// field has one, named after its snake-case field name.
    ///
    /// Invalid values are silently ignored (fall back to file/default).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("TASKHUB_BROKER_URL").filter(|v| !v.is_empty()) {
            self.broker_url = v;
        }
        if let Some(v) = parse_override(&get, "TASKHUB_MAX_RECONNECT_ATTEMPTS") {
            self.max_reconnect_attempts = v;
        }
        if let Some(v) = parse_override(&get, "TASKHUB_RECONNECT_BACKOFF_MS") {
            self.reconnect_backoff_ms = v;
        }
        if let Some(v) = parse_override(&get, "TASKHUB_HEARTBEAT_INTERVAL_MS") {
            self.heartbeat_interval_ms = v;
        }
        if let Some(v) = parse_override(&get, "TASKHUB_STATUS_DEBOUNCE_MS") {
            self.status_debounce_ms = v;
        }
        if let Some(v) = parse_override(&get, "TASKHUB_SETTLE_DELAY_MS") {
            self.settle_delay_ms = v;
        }
        if let Some(v) = parse_override(&get, "TASKHUB_DEDUP_WINDOW_MS") {
            self.dedup_window_ms = v;
        }
        if let Some(v) = parse_override(&get, "TASKHUB_DEDUP_RETENTION_MS") {
            self.dedup_retention_ms = v;
        }
        if let Some(v) = parse_override(&get, "TASKHUB_EVENT_CAPACITY") {
            self.event_capacity = v;
        }
    }

    /// Linear backoff unit as a [`Duration`].
    #[must_use]
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Heartbeat period as a [`Duration`].
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Snapshot request debounce as a [`Duration`].
    #[must_use]
    pub fn status_debounce(&self) -> Duration {
        Duration::from_millis(self.status_debounce_ms)
    }

    /// Settle delay as a [`Duration`].
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Dedup window as a [`Duration`].
    #[must_use]
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    /// Dedup retention as a [`Duration`].
    #[must_use]
    pub fn dedup_retention(&self) -> Duration {
        Duration::from_millis(self.dedup_retention_ms)
    }
}

fn parse_override<T: std::str::FromStr>(
    get: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    get(name).and_then(|v| v.parse().ok())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

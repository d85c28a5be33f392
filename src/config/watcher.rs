// src/config/watcher.rs
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::ingest::mode::PollingMode;
use crate::ingest::rate::RateBounds;

pub const ENV_WATCHER_CONFIG_PATH: &str = "WATCHER_CONFIG_PATH";
pub const DEFAULT_WATCHER_CONFIG_PATH: &str = "config/watcher.toml";

fn default_catalog_url() -> String {
    "https://booking.example.org/catalog".to_string()
}
fn default_catalog_selector() -> String {
    "[data-catalog]".to_string()
}
fn default_catalog_attr() -> String {
    "data-catalog".to_string()
}
fn default_resource_url() -> String {
    "https://booking.example.org/api/v1/slots?service={id}".to_string()
}
fn default_user_agent() -> String {
    concat!("slot-watcher/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_discovery_interval_secs() -> u64 {
    24 * 3600
}
fn default_seen_ttl_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_recovery_factor() -> f64 {
    0.9
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_normal() -> ModeProfile {
    ModeProfile {
        poll_interval_secs: 60,
        min_delay_ms: 500,
        max_delay_ms: 10_000,
    }
}
fn default_aggressive() -> ModeProfile {
    ModeProfile {
        poll_interval_secs: 10,
        min_delay_ms: 100,
        max_delay_ms: 2_000,
    }
}

/// Cadence and rate bounds of one polling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeProfile {
    pub poll_interval_secs: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl ModeProfile {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn bounds(&self) -> RateBounds {
        RateBounds::new(
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    fn sanitize(&mut self, fallback: ModeProfile) {
        if self.poll_interval_secs == 0 {
            self.poll_interval_secs = fallback.poll_interval_secs;
        }
        if self.max_delay_ms == 0 {
            self.max_delay_ms = fallback.max_delay_ms;
        }
        if self.min_delay_ms > self.max_delay_ms {
            std::mem::swap(&mut self.min_delay_ms, &mut self.max_delay_ms);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    /// CSS selector of elements carrying the embedded catalog JSON.
    #[serde(default = "default_catalog_selector")]
    pub catalog_selector: String,
    #[serde(default = "default_catalog_attr")]
    pub catalog_attr: String,
    /// `{id}` is replaced by the resource id.
    #[serde(default = "default_resource_url")]
    pub resource_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
    /// How long a notified slot stays suppressed before it may notify again.
    #[serde(default = "default_seen_ttl_secs")]
    pub seen_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Multiplier (< 1) applied to the request delay after a success.
    #[serde(default = "default_recovery_factor")]
    pub recovery_factor: f64,
    /// Multiplier (> 1) applied to the request delay after a 429.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default)]
    pub initial_mode: PollingMode,
    #[serde(default = "default_normal")]
    pub normal: ModeProfile,
    #[serde(default = "default_aggressive")]
    pub aggressive: ModeProfile,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            catalog_selector: default_catalog_selector(),
            catalog_attr: default_catalog_attr(),
            resource_url: default_resource_url(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            discovery_interval_secs: default_discovery_interval_secs(),
            seen_ttl_secs: default_seen_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            recovery_factor: default_recovery_factor(),
            backoff_factor: default_backoff_factor(),
            initial_mode: PollingMode::default(),
            normal: default_normal(),
            aggressive: default_aggressive(),
            webhook_url: None,
        }
    }
}

impl WatcherConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: WatcherConfig = toml::from_str(s).context("parsing watcher config")?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading watcher config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    /// Load using env var + fallbacks:
    /// 1) $WATCHER_CONFIG_PATH (must exist)
    /// 2) config/watcher.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_WATCHER_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("{ENV_WATCHER_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from_file(&pb);
        }
        let default_p = PathBuf::from(DEFAULT_WATCHER_CONFIG_PATH);
        if default_p.exists() {
            return Self::load_from_file(&default_p);
        }
        Ok(Self::default())
    }

    pub fn profile(&self, mode: PollingMode) -> ModeProfile {
        match mode {
            PollingMode::Normal => self.normal,
            PollingMode::Aggressive => self.aggressive,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn seen_ttl(&self) -> Duration {
        Duration::from_secs(self.seen_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn sanitize(&mut self) {
        if !(self.recovery_factor > 0.0 && self.recovery_factor < 1.0) {
            self.recovery_factor = default_recovery_factor();
        }
        if !(self.backoff_factor.is_finite() && self.backoff_factor > 1.0) {
            self.backoff_factor = default_backoff_factor();
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        if self.discovery_interval_secs == 0 {
            self.discovery_interval_secs = default_discovery_interval_secs();
        }
        if self.seen_ttl_secs == 0 {
            self.seen_ttl_secs = default_seen_ttl_secs();
        }
        if self.sweep_interval_secs == 0 {
            self.sweep_interval_secs = default_sweep_interval_secs();
        }
        self.normal.sanitize(default_normal());
        self.aggressive.sanitize(default_aggressive());
        if self.webhook_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            self.webhook_url = None;
        }
    }
}

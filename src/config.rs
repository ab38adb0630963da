//! # Backend, Cache and Polling Configuration
//!
//! This module defines the configuration for the backend connection, the
//! listing/thumbnail caches and the status poller.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [backend]
//! kind = "nanodlp"
//! base_url = "http://192.168.1.20"
//! request_timeout_ms = 2000
//!
//! [cache]
//! listing_ttl_secs = 5
//! thumbnail_placeholder_ttl_secs = 30
//!
//! [polling]
//! interval_ms = 1000
//! continuous_interval_ms = 100
//!
//! [nanodlp]
//! height_scale = 1000.0
//! ```
//!
//! - Every field has a default, so an empty file (or no file) is a valid config.
//! - `base_url` falls back to the usual address of the selected backend.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::backend::BackendKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the backend connection, caches and poller.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub nanodlp: NanoDlpConfig,
}

/// Which backend to talk to, and how long a single request may take.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            base_url: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(self.kind.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// TTLs for cached listings and thumbnails.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_listing_ttl_secs")]
    pub listing_ttl_secs: u64,
    #[serde(default = "default_thumbnail_ttl_secs")]
    pub thumbnail_ttl_secs: u64,
    #[serde(default = "default_thumbnail_placeholder_ttl_secs")]
    pub thumbnail_placeholder_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            listing_ttl_secs: default_listing_ttl_secs(),
            thumbnail_ttl_secs: default_thumbnail_ttl_secs(),
            thumbnail_placeholder_ttl_secs: default_thumbnail_placeholder_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn listing_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_ttl_secs)
    }

    pub fn thumbnail_ttl(&self) -> Duration {
        Duration::from_secs(self.thumbnail_ttl_secs)
    }

    pub fn thumbnail_placeholder_ttl(&self) -> Duration {
        Duration::from_secs(self.thumbnail_placeholder_ttl_secs)
    }
}

/// Status poller timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_continuous_interval_ms")]
    pub continuous_interval_ms: u64,
    /// A non-forced refresh within this window reuses the last snapshot.
    #[serde(default = "default_status_ttl_ms")]
    pub status_ttl_ms: u64,
    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,
    #[serde(default = "default_startup_backoff_ms")]
    pub startup_backoff_ms: u64,
    #[serde(default = "default_startup_backoff_max_ms")]
    pub startup_backoff_max_ms: u64,
    #[serde(default = "default_kinematic_attempts")]
    pub kinematic_attempts: u32,
    #[serde(default = "default_kinematic_retry_ms")]
    pub kinematic_retry_ms: u64,
    #[serde(default = "default_kinematic_retry_max_ms")]
    pub kinematic_retry_max_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            continuous_interval_ms: default_continuous_interval_ms(),
            status_ttl_ms: default_status_ttl_ms(),
            startup_attempts: default_startup_attempts(),
            startup_backoff_ms: default_startup_backoff_ms(),
            startup_backoff_max_ms: default_startup_backoff_max_ms(),
            kinematic_attempts: default_kinematic_attempts(),
            kinematic_retry_ms: default_kinematic_retry_ms(),
            kinematic_retry_max_ms: default_kinematic_retry_max_ms(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn continuous_interval(&self) -> Duration {
        Duration::from_millis(self.continuous_interval_ms)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_millis(self.status_ttl_ms)
    }
}

/// NanoDLP specifics.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NanoDlpConfig {
    /// Raw `CurrentHeight` units per millimetre.
    #[serde(default = "default_height_scale")]
    pub height_scale: f64,
}

impl Default for NanoDlpConfig {
    fn default() -> Self {
        Self { height_scale: default_height_scale() }
    }
}

impl Config {
    /// Validate timing and scale values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("backend.request_timeout_ms must be > 0".to_string()));
        }
        if self.polling.interval_ms == 0 || self.polling.continuous_interval_ms == 0 {
            return Err(ConfigError::Invalid("polling intervals must be > 0".to_string()));
        }
        if self.polling.continuous_interval_ms > self.polling.interval_ms {
            return Err(ConfigError::Invalid(
                "polling.continuous_interval_ms must not exceed polling.interval_ms".to_string(),
            ));
        }
        if !(self.nanodlp.height_scale > 0.0) {
            return Err(ConfigError::Invalid("nanodlp.height_scale must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_request_timeout_ms() -> u64 { 2000 }
fn default_listing_ttl_secs() -> u64 { 5 }
fn default_thumbnail_ttl_secs() -> u64 { 3600 }
fn default_thumbnail_placeholder_ttl_secs() -> u64 { 30 }
fn default_interval_ms() -> u64 { 1000 }
fn default_continuous_interval_ms() -> u64 { 100 }
fn default_status_ttl_ms() -> u64 { 500 }
fn default_startup_attempts() -> u32 { 8 }
fn default_startup_backoff_ms() -> u64 { 250 }
fn default_startup_backoff_max_ms() -> u64 { 8000 }
fn default_kinematic_attempts() -> u32 { 10 }
fn default_kinematic_retry_ms() -> u64 { 50 }
fn default_kinematic_retry_max_ms() -> u64 { 1000 }
fn default_height_scale() -> f64 { 1000.0 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}

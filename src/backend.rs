// src/backend.rs - Backend-neutral interface the provider and UI talk to
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use orion_shared::{CanonicalStatus, KinematicStatus, RawStatus};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::BackendError;
use crate::http::{BoundedHttpClient, ReqwestTransport};
use crate::nanodlp::NanoDlpBackend;
use crate::odyssey::OdysseyBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    NanoDlp,
    Odyssey,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::NanoDlp => "nanodlp",
            BackendKind::Odyssey => "odyssey",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            BackendKind::NanoDlp => "http://127.0.0.1",
            BackendKind::Odyssey => "http://127.0.0.1:12357",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailSize {
    #[default]
    Small,
    Large,
}

impl ThumbnailSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailSize::Small => "Small",
            ThumbnailSize::Large => "Large",
        }
    }
}

/// Thumbnail fetch result. `Placeholder` stands for a cached failure and is
/// returned until its TTL runs out.
#[derive(Debug, Clone, PartialEq)]
pub enum Thumbnail {
    Image(Bytes),
    Placeholder,
}

impl Thumbnail {
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Thumbnail::Image(bytes) => Some(bytes),
            Thumbnail::Placeholder => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Thumbnail::Placeholder)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate_id: Option<u64>,
    #[serde(default)]
    pub has_preview: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_time_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileListing {
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// One status reply as fetched, before any per-session state is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusReading {
    NanoDlp(RawStatus),
    Canonical(CanonicalStatus),
}

/// Status, file and configuration access for one printer backend.
#[async_trait]
pub trait PrinterBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Fetches a status reply without touching session state. Never cached.
    async fn fetch_status(&self) -> Result<StatusReading, BackendError>;

    /// Folds a reading into the session state (previous state code, last
    /// layer) and returns it in canonical form. Readings must be passed in
    /// the order their fetches were started.
    fn canonicalize(&self, reading: StatusReading) -> CanonicalStatus;

    /// Fresh status in canonical form, for callers that poll one at a time.
    async fn get_status(&self) -> Result<CanonicalStatus, BackendError> {
        let reading = self.fetch_status().await?;
        Ok(self.canonicalize(reading))
    }

    async fn get_kinematic_status(&self) -> Result<KinematicStatus, BackendError>;

    async fn get_printer_config(&self) -> Result<serde_json::Value, BackendError>;

    async fn list_items(
        &self,
        volume: &str,
        limit: usize,
        offset: usize,
        path: &str,
    ) -> Result<FileListing, BackendError>;

    async fn get_file_thumbnail(
        &self,
        volume: &str,
        path: &str,
        size: ThumbnailSize,
    ) -> Result<Thumbnail, BackendError>;

    async fn manual_command(&self, command: &str) -> Result<(), BackendError>;

    /// Drops per-session state such as the previous print state.
    fn reset_session(&self);
}

/// Motion and exposure commands. Every method reports success as a boolean;
/// failures are logged, never raised.
#[async_trait]
pub trait PrinterCommands: Send + Sync {
    async fn home(&self) -> bool;
    async fn move_to(&self, z: f64) -> bool;
    async fn move_delta(&self, delta: f64) -> bool;
    async fn move_to_top(&self) -> bool;
    async fn move_to_floor(&self) -> bool;
    async fn set_z_offset(&self, offset: f64) -> bool;
    async fn reset_z_offset(&self) -> bool;
    async fn emergency_stop(&self) -> bool;
    async fn display_test(&self, pattern: &str) -> bool;
    async fn cure(&self, on: bool) -> bool;
    async fn tare_force_sensor(&self) -> bool;
}

pub trait Backend: PrinterBackend + PrinterCommands {}

impl<T: PrinterBackend + PrinterCommands> Backend for T {}

/// Logs a failed command and folds the result into the boolean the command
/// interface returns.
pub(crate) fn command_result(kind: BackendKind, command: &str, result: Result<(), BackendError>) -> bool {
    match result {
        Ok(()) => {
            tracing::debug!(backend = %kind, command, "command accepted");
            true
        }
        Err(e) => {
            tracing::warn!(backend = %kind, command, error = %e, "command failed");
            false
        }
    }
}

/// Builds the backend named in the configuration on top of a reqwest transport.
pub fn build_backend(config: &Config) -> Result<Arc<dyn Backend>, BackendError> {
    let transport = Arc::new(ReqwestTransport::new()?);
    let http = BoundedHttpClient::new(transport, config.backend.request_timeout());
    let base_url = config.backend.base_url();
    tracing::info!(backend = %config.backend.kind, base_url = %base_url, "creating backend");

    let backend: Arc<dyn Backend> = match config.backend.kind {
        BackendKind::NanoDlp => Arc::new(NanoDlpBackend::new(http, &base_url, config)),
        BackendKind::Odyssey => Arc::new(OdysseyBackend::new(http, &base_url, &config.cache)),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_uses_lowercase_names() {
        let kind: BackendKind = serde_json::from_str("\"odyssey\"").unwrap();
        assert_eq!(kind, BackendKind::Odyssey);
        assert_eq!(serde_json::to_string(&BackendKind::NanoDlp).unwrap(), "\"nanodlp\"");
    }

    #[test]
    fn failed_command_folds_to_false() {
        assert!(command_result(BackendKind::NanoDlp, "home", Ok(())));
        assert!(!command_result(
            BackendKind::NanoDlp,
            "home",
            Err(BackendError::NotFound("x".into()))
        ));
    }
}

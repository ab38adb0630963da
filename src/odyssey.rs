// src/odyssey.rs - Odyssey backend adapter
//!
//! Odyssey already serves the canonical status shape, so this adapter is a
//! thin HTTP layer. Listings and thumbnails share the NanoDLP cache rules.

use async_trait::async_trait;
use bytes::Bytes;
use orion_shared::{CanonicalStatus, KinematicStatus};

use crate::backend::{
    command_result, BackendKind, FileListing, PrinterBackend, PrinterCommands, StatusReading, Thumbnail,
    ThumbnailSize,
};
use crate::cache::{CacheStore, Cached, FetchPolicy};
use crate::config::CacheConfig;
use crate::error::BackendError;
use crate::http::{BoundedHttpClient, HttpRequest};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListingKey {
    volume: String,
    path: String,
    limit: usize,
    offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ThumbnailKey {
    volume: String,
    path: String,
    size: ThumbnailSize,
}

pub struct OdysseyBackend {
    http: BoundedHttpClient,
    base_url: String,
    cache: CacheConfig,
    listings: CacheStore<ListingKey, FileListing>,
    thumbnails: CacheStore<ThumbnailKey, Bytes>,
}

impl OdysseyBackend {
    pub fn new(http: BoundedHttpClient, base_url: &str, cache: &CacheConfig) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache: cache.clone(),
            listings: CacheStore::new("odyssey-listings"),
            thumbnails: CacheStore::new("odyssey-thumbnails"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `path` plus a URL-encoded query string built from `params`.
    fn url_with(&self, path: &str, params: &[(&str, String)]) -> Result<String, BackendError> {
        let url = self.url(path);
        if params.is_empty() {
            return Ok(url);
        }
        reqwest::Url::parse_with_params(&url, params)
            .map(String::from)
            .map_err(|e| BackendError::Transport { url, message: format!("invalid URL: {}", e) })
    }

    async fn post(&self, path: &str, params: &[(&str, String)]) -> Result<(), BackendError> {
        let url = self.url_with(path, params)?;
        self.http
            .send_default(HttpRequest::post(url))
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl PrinterBackend for OdysseyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Odyssey
    }

    async fn fetch_status(&self) -> Result<StatusReading, BackendError> {
        Ok(StatusReading::Canonical(self.http.get_json(&self.url("/status")).await?))
    }

    // Odyssey derives the finished edge itself.
    fn canonicalize(&self, reading: StatusReading) -> CanonicalStatus {
        match reading {
            StatusReading::Canonical(status) => status,
            StatusReading::NanoDlp(raw) => {
                tracing::warn!(?raw, "NanoDLP reading handed to the Odyssey backend");
                CanonicalStatus::default()
            }
        }
    }

    async fn get_kinematic_status(&self) -> Result<KinematicStatus, BackendError> {
        self.http.get_json(&self.url("/kinematic_status")).await
    }

    async fn get_printer_config(&self) -> Result<serde_json::Value, BackendError> {
        self.http.get_json(&self.url("/config")).await
    }

    async fn list_items(
        &self,
        volume: &str,
        limit: usize,
        offset: usize,
        path: &str,
    ) -> Result<FileListing, BackendError> {
        let key = ListingKey {
            volume: volume.to_string(),
            path: path.to_string(),
            limit,
            offset,
        };
        let url = self.url_with(
            "/files",
            &[
                ("location", volume.to_string()),
                ("max", limit.to_string()),
                ("offset", offset.to_string()),
                ("subdir", path.to_string()),
            ],
        )?;
        let policy = FetchPolicy::success_only(self.cache.listing_ttl());
        let outcome = self
            .listings
            .get_or_fetch(key, policy, || self.http.get_json::<FileListing>(&url))
            .await?;
        Ok(outcome.value().unwrap_or_default())
    }

    async fn get_file_thumbnail(
        &self,
        volume: &str,
        path: &str,
        size: ThumbnailSize,
    ) -> Result<Thumbnail, BackendError> {
        let key = ThumbnailKey {
            volume: volume.to_string(),
            path: path.to_string(),
            size,
        };
        let url = self.url_with(
            "/files/thumbnail",
            &[
                ("location", volume.to_string()),
                ("file_path", path.to_string()),
                ("size", size.as_str().to_string()),
            ],
        )?;
        let policy = FetchPolicy::with_placeholder(
            self.cache.thumbnail_ttl(),
            self.cache.thumbnail_placeholder_ttl(),
        );
        let outcome = self
            .thumbnails
            .get_or_fetch(key, policy, || self.http.get_bytes(&url))
            .await?;
        Ok(match outcome {
            Cached::Value(bytes) => Thumbnail::Image(bytes),
            Cached::Placeholder => Thumbnail::Placeholder,
        })
    }

    async fn manual_command(&self, command: &str) -> Result<(), BackendError> {
        let request = HttpRequest::post(self.url("/manual/hardware_command"))
            .with_form_field("command", command);
        self.http.send_default(request).await?.error_for_status()?;
        Ok(())
    }

    fn reset_session(&self) {}
}

#[async_trait]
impl PrinterCommands for OdysseyBackend {
    async fn home(&self) -> bool {
        command_result(self.kind(), "home", self.post("/manual/home", &[]).await)
    }

    async fn move_to(&self, z: f64) -> bool {
        command_result(self.kind(), "move", self.post("/manual/move", &[("z", z.to_string())]).await)
    }

    async fn move_delta(&self, delta: f64) -> bool {
        let result = self.post("/manual/move_delta", &[("dz", delta.to_string())]).await;
        command_result(self.kind(), "move_delta", result)
    }

    async fn move_to_top(&self) -> bool {
        command_result(self.kind(), "move_to_top", self.post("/manual/top", &[]).await)
    }

    async fn move_to_floor(&self) -> bool {
        command_result(self.kind(), "move_to_floor", self.post("/manual/floor", &[]).await)
    }

    async fn set_z_offset(&self, offset: f64) -> bool {
        let result = self.post("/manual/z_offset", &[("offset", offset.to_string())]).await;
        command_result(self.kind(), "set_z_offset", result)
    }

    async fn reset_z_offset(&self) -> bool {
        command_result(self.kind(), "reset_z_offset", self.post("/manual/z_offset/reset", &[]).await)
    }

    async fn emergency_stop(&self) -> bool {
        command_result(self.kind(), "emergency_stop", self.post("/manual/stop", &[]).await)
    }

    async fn display_test(&self, pattern: &str) -> bool {
        let result = self.post("/manual/display/test", &[("pattern", pattern.to_string())]).await;
        command_result(self.kind(), "display_test", result)
    }

    async fn cure(&self, on: bool) -> bool {
        command_result(self.kind(), "cure", self.post("/manual/cure", &[("cure", on.to_string())]).await)
    }

    async fn tare_force_sensor(&self) -> bool {
        command_result(self.kind(), "tare_force_sensor", self.post("/manual/tare", &[]).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::http::{HttpResponse, HttpTransport};

    struct Unreachable;

    #[async_trait]
    impl HttpTransport for Unreachable {
        async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, BackendError> {
            Err(BackendError::Transport { url: request.url.clone(), message: "offline".into() })
        }
    }

    fn backend() -> OdysseyBackend {
        let http = BoundedHttpClient::new(Arc::new(Unreachable), Duration::from_secs(1));
        OdysseyBackend::new(http, "http://printer.local:12357/", &CacheConfig::default())
    }

    #[test]
    fn query_values_are_url_encoded() {
        let url = backend()
            .url_with(
                "/files/thumbnail",
                &[
                    ("location", "local".to_string()),
                    ("file_path", "resin/my cube&co.sl1".to_string()),
                ],
            )
            .unwrap();
        assert_eq!(
            url,
            "http://printer.local:12357/files/thumbnail?location=local&file_path=resin%2Fmy+cube%26co.sl1"
        );
    }

    #[test]
    fn no_params_leaves_url_untouched() {
        assert_eq!(backend().url_with("/manual/home", &[]).unwrap(), "http://printer.local:12357/manual/home");
    }
}

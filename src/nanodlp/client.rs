//! HTTP client for the NanoDLP endpoints.
//!
//! Listing and thumbnail calls go through [`CacheStore`]s; status, config and
//! command calls never do. Every request is bounded by the configured timeout.

use std::sync::Arc;

use bytes::Bytes;
use orion_shared::{Plate, RawStatus};

use crate::backend::{FileEntry, FileListing, Thumbnail, ThumbnailSize};
use crate::cache::{CacheStore, Cached, FetchPolicy};
use crate::config::CacheConfig;
use crate::error::BackendError;
use crate::http::{BoundedHttpClient, HttpRequest};

pub const STATUS_PATH: &str = "/status";
pub const PLATES_PATH: &str = "/plates/list/json";
pub const CONFIG_PATH: &str = "/json/db/machine.json";
pub const GCODE_PATH: &str = "/gcode";

const PLATES_KEY: &str = "plates";

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

pub struct NanoDlpClient {
    http: BoundedHttpClient,
    base_url: String,
    cache: CacheConfig,
    plates: CacheStore<&'static str, Arc<Vec<Plate>>>,
    listings: CacheStore<ListingKey, FileListing>,
    thumbnails: CacheStore<ThumbnailKey, Bytes>,
}

impl NanoDlpClient {
    pub fn new(http: BoundedHttpClient, base_url: &str, cache: CacheConfig) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
            plates: CacheStore::new("nanodlp-plates"),
            listings: CacheStore::new("nanodlp-listings"),
            thumbnails: CacheStore::new("nanodlp-thumbnails"),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Full plate list, cached for the listing TTL.
    pub async fn plates(&self) -> Result<Arc<Vec<Plate>>, BackendError> {
        let url = self.url(PLATES_PATH);
        let policy = FetchPolicy::success_only(self.cache.listing_ttl());
        let outcome = self
            .plates
            .get_or_fetch(PLATES_KEY, policy, || async {
                let plates: Vec<Plate> = self.http.get_json(&url).await?;
                tracing::debug!(count = plates.len(), "fetched plate list");
                Ok(Arc::new(plates))
            })
            .await?;
        Ok(outcome.value().unwrap_or_default())
    }

    /// One page of plates under `path`. Every parameter is part of the cache
    /// key, so each page is cached on its own.
    pub async fn list_items(
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
        let policy = FetchPolicy::success_only(self.cache.listing_ttl());
        let outcome = self
            .listings
            .get_or_fetch(key, policy, || async {
                let plates = self.plates().await?;
                Ok(page(&plates, path, limit, offset))
            })
            .await?;
        Ok(outcome.value().unwrap_or_default())
    }

    /// Rendered preview of the plate at `path`. Failed fetches are cached as
    /// [`Thumbnail::Placeholder`] for the placeholder TTL.
    pub async fn get_file_thumbnail(
        &self,
        volume: &str,
        path: &str,
        size: ThumbnailSize,
    ) -> Result<Thumbnail, BackendError> {
        let plates = self.plates().await?;
        let plate = find_plate(&plates, path)
            .ok_or_else(|| BackendError::NotFound(format!("plate {}", path)))?;

        let key = ThumbnailKey {
            volume: volume.to_string(),
            path: path.to_string(),
            size,
        };

        if !plate.preview {
            if self.thumbnails.get(&key).is_none() {
                self.thumbnails
                    .put_placeholder(key, self.cache.thumbnail_placeholder_ttl());
            }
            return Ok(Thumbnail::Placeholder);
        }

        let url = self.url(&format!("/static/plates/{}/3d.png", plate.plate_id));
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

    /// Drops cached listings, e.g. after plates were added or removed.
    pub fn invalidate_listings(&self) {
        self.plates.clear();
        self.listings.clear();
    }

    pub async fn get_status(&self) -> Result<RawStatus, BackendError> {
        self.http.get_json(&self.url(STATUS_PATH)).await
    }

    pub async fn get_printer_config(&self) -> Result<serde_json::Value, BackendError> {
        self.http.get_json(&self.url(CONFIG_PATH)).await
    }

    pub async fn manual_command(&self, command: &str) -> Result<(), BackendError> {
        let request = HttpRequest::post(self.url(GCODE_PATH)).with_form_field("gcode", command);
        self.http.send_default(request).await?.error_for_status()?;
        Ok(())
    }

    /// Fires a GET command endpoint and checks for a 2xx reply.
    pub async fn command(&self, path: &str) -> Result<(), BackendError> {
        self.http
            .send_default(HttpRequest::get(self.url(path)))
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn find_plate<'a>(plates: &'a [Plate], path: &str) -> Option<&'a Plate> {
    let wanted = normalize(path);
    plates.iter().find(|plate| normalize(&plate.path) == wanted)
}

fn page(plates: &[Plate], path: &str, limit: usize, offset: usize) -> FileListing {
    let prefix = normalize(path);
    let in_dir = |plate: &&Plate| {
        let plate_path = normalize(&plate.path);
        prefix.is_empty()
            || plate_path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    };
    let take = if limit == 0 { usize::MAX } else { limit };

    let files = plates
        .iter()
        .filter(in_dir)
        .skip(offset)
        .take(take)
        .map(|plate| FileEntry {
            path: plate.path.clone(),
            name: plate.name().to_string(),
            plate_id: Some(plate.plate_id),
            has_preview: plate.preview,
            layer_count: plate.layers_count,
            print_time_seconds: plate.print_time,
        })
        .collect();
    FileListing { files }
}

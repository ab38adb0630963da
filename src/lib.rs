// src/lib.rs - Printer backend abstraction core
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod nanodlp;
pub mod odyssey;
pub mod provider;

pub use backend::{
    build_backend, Backend, BackendKind, FileEntry, FileListing, PrinterBackend, PrinterCommands, StatusReading,
    Thumbnail, ThumbnailSize,
};
pub use cache::{CacheStore, Cached, FetchPolicy};
pub use config::{load_config, Config, ConfigError};
pub use error::BackendError;
pub use http::{BoundedHttpClient, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use nanodlp::{NanoDlpBackend, NanoDlpClient, StateHandler};
pub use odyssey::OdysseyBackend;
pub use provider::{ListenerId, PollerHandle, ProviderSnapshot, StatusProvider};

pub use orion_shared::{CanonicalStatus, KinematicStatus, PrintStatus, RawStatus};

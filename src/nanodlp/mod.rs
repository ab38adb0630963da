// src/nanodlp/mod.rs - NanoDLP backend adapter
pub mod client;
pub mod mapper;
pub mod state_handler;

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use orion_shared::{CanonicalStatus, KinematicStatus};

use crate::backend::{
    command_result, BackendKind, FileListing, PrinterBackend, PrinterCommands, StatusReading, Thumbnail,
    ThumbnailSize,
};
use crate::config::Config;
use crate::error::BackendError;
use crate::http::BoundedHttpClient;

pub use client::NanoDlpClient;
pub use mapper::{nano_status_to_canonical, DEFAULT_HEIGHT_SCALE};
pub use state_handler::{Canonicalized, StateHandler};

/// Z moves are issued in microns.
const MICRONS_PER_MM: f64 = 1000.0;

/// NanoDLP's status carries no homing or Z offset information, so both are
/// tracked here from the commands we issue.
#[derive(Debug, Clone, Copy, Default)]
struct LocalKinematics {
    homed: bool,
    offset: f64,
}

pub struct NanoDlpBackend {
    client: NanoDlpClient,
    state: Mutex<StateHandler>,
    kinematics: Mutex<LocalKinematics>,
    height_scale: f64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NanoDlpBackend {
    pub fn new(http: BoundedHttpClient, base_url: &str, config: &Config) -> Self {
        Self::with_client(
            NanoDlpClient::new(http, base_url, config.cache.clone()),
            config.nanodlp.height_scale,
        )
    }

    pub fn with_client(client: NanoDlpClient, height_scale: f64) -> Self {
        Self {
            client,
            state: Mutex::new(StateHandler::new()),
            kinematics: Mutex::new(LocalKinematics::default()),
            height_scale,
        }
    }

    pub fn client(&self) -> &NanoDlpClient {
        &self.client
    }

    async fn current_z(&self) -> Result<f64, BackendError> {
        let raw = self.client.get_status().await?;
        Ok(mapper::height_to_mm(raw.current_height, self.height_scale))
    }

    async fn move_relative(&self, delta: f64) -> Result<(), BackendError> {
        if !delta.is_finite() {
            return Err(BackendError::InvalidArgument(format!("non-finite Z move {}", delta)));
        }
        let microns = (delta.abs() * MICRONS_PER_MM).round() as u64;
        if microns == 0 {
            return Ok(());
        }
        let direction = if delta > 0.0 { "up" } else { "down" };
        self.client
            .command(&format!("/z-axis/move/{}/micron/{}", direction, microns))
            .await
    }
}

#[async_trait]
impl PrinterBackend for NanoDlpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NanoDlp
    }

    async fn fetch_status(&self) -> Result<StatusReading, BackendError> {
        Ok(StatusReading::NanoDlp(self.client.get_status().await?))
    }

    fn canonicalize(&self, reading: StatusReading) -> CanonicalStatus {
        match reading {
            StatusReading::NanoDlp(raw) => {
                let state = lock(&self.state).canonicalize(&raw);
                nano_status_to_canonical(&raw, &state, self.height_scale)
            }
            StatusReading::Canonical(status) => status,
        }
    }

    async fn get_kinematic_status(&self) -> Result<KinematicStatus, BackendError> {
        let position = self.current_z().await?;
        let local = *lock(&self.kinematics);
        Ok(KinematicStatus { homed: local.homed, position, offset: local.offset })
    }

    async fn get_printer_config(&self) -> Result<serde_json::Value, BackendError> {
        self.client.get_printer_config().await
    }

    async fn list_items(
        &self,
        volume: &str,
        limit: usize,
        offset: usize,
        path: &str,
    ) -> Result<FileListing, BackendError> {
        self.client.list_items(volume, limit, offset, path).await
    }

    async fn get_file_thumbnail(
        &self,
        volume: &str,
        path: &str,
        size: ThumbnailSize,
    ) -> Result<Thumbnail, BackendError> {
        self.client.get_file_thumbnail(volume, path, size).await
    }

    async fn manual_command(&self, command: &str) -> Result<(), BackendError> {
        self.client.manual_command(command).await
    }

    fn reset_session(&self) {
        lock(&self.state).reset();
    }
}

#[async_trait]
impl PrinterCommands for NanoDlpBackend {
    async fn home(&self) -> bool {
        let ok = command_result(self.kind(), "home", self.client.command("/z-axis/calibrate").await);
        if ok {
            lock(&self.kinematics).homed = true;
        }
        ok
    }

    async fn move_to(&self, z: f64) -> bool {
        if !z.is_finite() {
            tracing::warn!(z, "rejecting non-finite Z target");
            return false;
        }
        let result = match self.current_z().await {
            Ok(current) => self.move_relative(z - current).await,
            Err(e) => Err(e),
        };
        command_result(self.kind(), "move", result)
    }

    async fn move_delta(&self, delta: f64) -> bool {
        command_result(self.kind(), "move_delta", self.move_relative(delta).await)
    }

    async fn move_to_top(&self) -> bool {
        command_result(self.kind(), "move_to_top", self.client.command("/z-axis/top").await)
    }

    async fn move_to_floor(&self) -> bool {
        command_result(self.kind(), "move_to_floor", self.client.command("/z-axis/bottom").await)
    }

    async fn set_z_offset(&self, offset: f64) -> bool {
        if !offset.is_finite() {
            tracing::warn!(offset, "rejecting non-finite Z offset");
            return false;
        }
        lock(&self.kinematics).offset = offset;
        true
    }

    async fn reset_z_offset(&self) -> bool {
        lock(&self.kinematics).offset = 0.0;
        true
    }

    async fn emergency_stop(&self) -> bool {
        let result = self.client.command("/printer/force-stop").await;
        lock(&self.kinematics).homed = false;
        command_result(self.kind(), "emergency_stop", result)
    }

    async fn display_test(&self, pattern: &str) -> bool {
        let path = format!("/projector/test/{}", pattern);
        command_result(self.kind(), "display_test", self.client.command(&path).await)
    }

    async fn cure(&self, on: bool) -> bool {
        let path = if on { "/projector/on" } else { "/projector/off" };
        command_result(self.kind(), "cure", self.client.command(path).await)
    }

    async fn tare_force_sensor(&self) -> bool {
        command_result(
            self.kind(),
            "tare_force_sensor",
            Err(BackendError::Unsupported { backend: "nanodlp", operation: "tare_force_sensor" }),
        )
    }
}

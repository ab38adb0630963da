//! Simulated NanoDLP backend.
//!
//! Serves the NanoDLP endpoints the host library talks to, backed by an
//! in-memory printer with a fake print job. Every `/status` read advances a
//! running job by one layer. When the last layer has been reported the job
//! ends: the printer goes idle, `LayerID` disappears and `LayersCount` stays,
//! which is how the real backend behaves on completion.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use orion_shared::{FileRef, Plate, RawStatus};
use serde::Deserialize;
use tokio::sync::Mutex;

/// Microns of Z travel per printed layer.
pub const LAYER_HEIGHT_MICRONS: i64 = 50;
pub const MAX_Z_MICRONS: i64 = 150_000;

/// Smallest valid PNG header; enough for clients that only move bytes around.
pub const PREVIEW_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Clone)]
struct Job {
    plate: Plate,
    layer: u32,
    layers_count: u32,
}

#[derive(Debug)]
pub struct SimPrinter {
    plates: Vec<Plate>,
    job: Option<Job>,
    paused: bool,
    last_layers_count: Option<u32>,
    z_microns: i64,
    curing: bool,
    gcode_log: Vec<String>,
    status_reads: u64,
}

impl Default for SimPrinter {
    fn default() -> Self {
        Self::with_plates(default_plates())
    }
}

pub fn default_plates() -> Vec<Plate> {
    vec![
        Plate {
            plate_id: 1,
            path: "calibration/cube.zip".to_string(),
            preview: true,
            layers_count: Some(5),
            print_time: Some(300.0),
        },
        Plate {
            plate_id: 2,
            path: "models/benchy.zip".to_string(),
            preview: true,
            layers_count: Some(40),
            print_time: Some(5400.0),
        },
        Plate {
            plate_id: 3,
            path: "models/no-preview.zip".to_string(),
            preview: false,
            layers_count: Some(10),
            print_time: None,
        },
    ]
}

impl SimPrinter {
    pub fn with_plates(plates: Vec<Plate>) -> Self {
        Self {
            plates,
            job: None,
            paused: false,
            last_layers_count: None,
            z_microns: 0,
            curing: false,
            gcode_log: Vec::new(),
            status_reads: 0,
        }
    }

    pub fn is_printing(&self) -> bool {
        self.job.is_some()
    }

    pub fn z_microns(&self) -> i64 {
        self.z_microns
    }

    pub fn gcode_log(&self) -> &[String] {
        &self.gcode_log
    }

    pub fn status_reads(&self) -> u64 {
        self.status_reads
    }

    pub fn start(&mut self, plate_id: u64) -> bool {
        let Some(plate) = self.plates.iter().find(|p| p.plate_id == plate_id).cloned() else {
            return false;
        };
        let layers_count = plate.layers_count.unwrap_or(1).max(1);
        tracing::info!(plate_id, layers_count, "simulated job started");
        self.job = Some(Job { plate, layer: 0, layers_count });
        self.paused = false;
        self.last_layers_count = Some(layers_count);
        self.z_microns = 0;
        true
    }

    pub fn stop(&mut self) {
        if self.job.take().is_some() {
            tracing::info!("simulated job stopped");
        }
        self.paused = false;
        self.curing = false;
    }

    /// Produces the next `/status` reply, advancing a running job.
    pub fn next_status(&mut self) -> RawStatus {
        self.status_reads += 1;

        let Some(job) = self.job.as_mut() else {
            return self.idle_status();
        };

        if job.layer >= job.layers_count {
            tracing::info!(layers = job.layers_count, "simulated job finished");
            self.job = None;
            self.paused = false;
            self.curing = false;
            return self.idle_status();
        }

        if !self.paused {
            job.layer += 1;
            self.z_microns = (job.layer as i64 * LAYER_HEIGHT_MICRONS).min(MAX_Z_MICRONS);
        }

        // The job's file metadata shows up one poll after the job starts.
        let file = (job.layer > 1).then(|| FileRef {
            path: job.plate.path.clone(),
            name: job.plate.name().to_string(),
            layer_count: job.layers_count,
            print_time_seconds: job.plate.print_time.unwrap_or(0.0) as u64,
        });

        RawStatus {
            printing: true,
            paused: self.paused,
            state: if self.paused { "Paused" } else { "Printing" }.to_string(),
            state_code: Some(1),
            layer_id: Some(job.layer),
            layers_count: Some(job.layers_count),
            current_height: Some(self.z_microns as f64),
            curing: Some(!self.paused),
            file,
        }
    }

    fn idle_status(&self) -> RawStatus {
        RawStatus {
            printing: false,
            paused: false,
            state: "Idle".to_string(),
            state_code: Some(0),
            layer_id: None,
            layers_count: self.last_layers_count,
            current_height: Some(self.z_microns as f64),
            curing: Some(self.curing),
            file: None,
        }
    }

    fn move_by(&mut self, microns: i64) {
        self.z_microns = (self.z_microns + microns).clamp(0, MAX_Z_MICRONS);
    }
}

pub type SharedPrinter = Arc<Mutex<SimPrinter>>;

/// Router over a fresh printer with the default plates.
pub fn app() -> Router {
    router(Arc::new(Mutex::new(SimPrinter::default())))
}

pub fn router(printer: SharedPrinter) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/plates/list/json", get(list_plates))
        .route("/static/plates/{id}/3d.png", get(plate_preview))
        .route("/json/db/machine.json", get(machine_config))
        .route("/z-axis/calibrate", get(calibrate))
        .route("/z-axis/move/{direction}/micron/{distance}", get(move_z))
        .route("/z-axis/top", get(move_top))
        .route("/z-axis/bottom", get(move_bottom))
        .route("/projector/test/{pattern}", get(projector_test))
        .route("/projector/on", get(projector_on))
        .route("/projector/off", get(projector_off))
        .route("/printer/start/{id}", get(start_print))
        .route("/printer/pause", get(pause_print))
        .route("/printer/unpause", get(resume_print))
        .route("/printer/force-stop", get(force_stop))
        .route("/gcode", post(run_gcode))
        .with_state(printer)
}

async fn get_status(State(printer): State<SharedPrinter>) -> Json<RawStatus> {
    Json(printer.lock().await.next_status())
}

async fn list_plates(State(printer): State<SharedPrinter>) -> Json<Vec<Plate>> {
    Json(printer.lock().await.plates.clone())
}

async fn plate_preview(
    State(printer): State<SharedPrinter>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, StatusCode> {
    let printer = printer.lock().await;
    match printer.plates.iter().find(|p| p.plate_id == id) {
        Some(plate) if plate.preview => Ok(([(header::CONTENT_TYPE, "image/png")], PREVIEW_PNG)),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn machine_config() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "Name": "Orion Simulator",
        "ZAxisHeight": MAX_Z_MICRONS / 1000,
        "ResinTemperature": 25,
        "ProjectorWidth": 3840,
        "ProjectorHeight": 2400,
    }))
}

async fn calibrate(State(printer): State<SharedPrinter>) -> StatusCode {
    let mut printer = printer.lock().await;
    if printer.is_printing() {
        return StatusCode::CONFLICT;
    }
    printer.z_microns = 0;
    StatusCode::OK
}

async fn move_z(
    State(printer): State<SharedPrinter>,
    Path((direction, distance)): Path<(String, i64)>,
) -> StatusCode {
    let mut printer = printer.lock().await;
    if printer.is_printing() {
        return StatusCode::CONFLICT;
    }
    match direction.as_str() {
        "up" => printer.move_by(distance),
        "down" => printer.move_by(-distance),
        _ => return StatusCode::BAD_REQUEST,
    }
    StatusCode::OK
}

async fn move_top(State(printer): State<SharedPrinter>) -> StatusCode {
    printer.lock().await.z_microns = MAX_Z_MICRONS;
    StatusCode::OK
}

async fn move_bottom(State(printer): State<SharedPrinter>) -> StatusCode {
    printer.lock().await.z_microns = 0;
    StatusCode::OK
}

async fn projector_test(Path(pattern): Path<String>) -> StatusCode {
    tracing::debug!(%pattern, "display test");
    StatusCode::OK
}

async fn projector_on(State(printer): State<SharedPrinter>) -> StatusCode {
    printer.lock().await.curing = true;
    StatusCode::OK
}

async fn projector_off(State(printer): State<SharedPrinter>) -> StatusCode {
    printer.lock().await.curing = false;
    StatusCode::OK
}

async fn start_print(State(printer): State<SharedPrinter>, Path(id): Path<u64>) -> StatusCode {
    let mut printer = printer.lock().await;
    if printer.is_printing() {
        return StatusCode::CONFLICT;
    }
    if printer.start(id) {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn pause_print(State(printer): State<SharedPrinter>) -> StatusCode {
    let mut printer = printer.lock().await;
    if !printer.is_printing() {
        return StatusCode::CONFLICT;
    }
    printer.paused = true;
    StatusCode::OK
}

async fn resume_print(State(printer): State<SharedPrinter>) -> StatusCode {
    printer.lock().await.paused = false;
    StatusCode::OK
}

async fn force_stop(State(printer): State<SharedPrinter>) -> StatusCode {
    printer.lock().await.stop();
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct GcodeForm {
    gcode: String,
}

async fn run_gcode(State(printer): State<SharedPrinter>, Form(form): Form<GcodeForm>) -> StatusCode {
    if form.gcode.trim().is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    tracing::debug!(gcode = %form.gcode, "gcode received");
    printer.lock().await.gcode_log.push(form.gcode);
    StatusCode::OK
}

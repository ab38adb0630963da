//! Canonical status model consumed by the UI, whatever backend is active.
//!
//! The JSON field names are the ones the Odyssey backend already emits, so an
//! Odyssey `/status` reply decodes straight into [`CanonicalStatus`] and a
//! mapped NanoDLP status serializes to the same shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrintStatus {
    #[default]
    Idle,
    Printing,
    Paused,
    Canceled,
    /// A state the backend reported that has no known label.
    #[serde(other)]
    Unknown,
}

impl PrintStatus {
    /// A job exists, running or paused.
    pub fn is_active(&self) -> bool {
        matches!(self, PrintStatus::Printing | PrintStatus::Paused)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrintStatus::Idle => "Idle",
            PrintStatus::Printing => "Printing",
            PrintStatus::Paused => "Paused",
            PrintStatus::Canceled => "Canceled",
            PrintStatus::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for PrintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalStatus {
    pub status: PrintStatus,
    #[serde(default)]
    pub paused: bool,
    /// One-shot flag: true only for the refresh that observed a job ending.
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub physical_state: PhysicalState,
    #[serde(default)]
    pub print_data: Option<PrintData>,
}

impl CanonicalStatus {
    /// A job is active, running or paused. Implies `print_data` is present
    /// for statuses produced by the NanoDLP mapper.
    pub fn is_printing(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_idle(&self) -> bool {
        self.status == PrintStatus::Idle
    }

    pub fn layer(&self) -> Option<u32> {
        self.print_data.as_ref().and_then(|data| data.layer)
    }

    /// Fraction of layers done, `0.0..=1.0`, when a job context exists.
    pub fn progress(&self) -> Option<f64> {
        let data = self.print_data.as_ref()?;
        if data.layer_count == 0 {
            return None;
        }
        let layer = data.layer? as f64;
        Some((layer / data.layer_count as f64).clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalState {
    /// Millimetres.
    pub z: f64,
    pub curing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintData {
    pub layer_count: u32,
    pub layer: Option<u32>,
    #[serde(default)]
    pub file_data: Option<FileData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub name: String,
    pub path: String,
}

/// Z axis snapshot used while homing and leveling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KinematicStatus {
    pub homed: bool,
    /// Millimetres.
    pub position: f64,
    pub offset: f64,
}

impl KinematicStatus {
    pub fn is_valid(&self) -> bool {
        self.position.is_finite() && self.offset.is_finite()
    }
}

//! Raw JSON shapes served by a NanoDLP backend.
//!
//! These mirror the backend's own field names (`Printing`, `LayerID`, ...).
//! NanoDLP is loose about numeric fields: a value can arrive as a number, a
//! numeric string, an empty string or `null` depending on where the job is in
//! its lifecycle, so the numeric fields are decoded leniently and anything that
//! is not a usable number becomes `None`.

use serde::{Deserialize, Deserializer, Serialize};

/// One decoded `/status` reply. Immutable per poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawStatus {
    #[serde(rename = "Printing", default)]
    pub printing: bool,
    #[serde(rename = "Paused", default)]
    pub paused: bool,
    /// Human readable state text.
    #[serde(rename = "Status", default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    /// Numeric state; `0` idle, `1` printing.
    #[serde(rename = "State", default, skip_serializing_if = "Option::is_none")]
    pub state_code: Option<i64>,
    #[serde(
        rename = "LayerID",
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub layer_id: Option<u32>,
    #[serde(
        rename = "LayersCount",
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub layers_count: Option<u32>,
    /// Z height in backend units (microns on stock machines).
    #[serde(
        rename = "CurrentHeight",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_height: Option<f64>,
    #[serde(rename = "Curing", default, skip_serializing_if = "Option::is_none")]
    pub curing: Option<bool>,
    /// Metadata of the running job. Can lag behind `printing` by a poll or two.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub layer_count: u32,
    #[serde(default)]
    pub print_time_seconds: u64,
}

/// Entry of `/plates/list/json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    #[serde(rename = "PlateID")]
    pub plate_id: u64,
    pub path: String,
    #[serde(rename = "Preview", default)]
    pub preview: bool,
    #[serde(
        rename = "LayersCount",
        default,
        deserialize_with = "lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub layers_count: Option<u32>,
    #[serde(
        rename = "PrintTime",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub print_time: Option<f64>,
}

impl Plate {
    /// Last path segment, which is what NanoDLP shows as the plate name.
    pub fn name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.path)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientNumber {
    Number(f64),
    Text(String),
    Flag(bool),
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<LenientNumber>::deserialize(deserializer)?;
    Ok(match value {
        Some(LenientNumber::Number(n)) if n.is_finite() => Some(n),
        Some(LenientNumber::Text(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    })
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?
        .filter(|n| *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32))
}

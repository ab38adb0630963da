//! Translation of a NanoDLP status into the canonical (Odyssey) shape.
//!
//! The mapping is not strictly field-for-field. While a job is active the
//! result always carries `print_data`, synthesized from the layer counters when
//! NanoDLP has not attached the job's `file` yet, so consumers can rely on
//! "printing implies print data". On the finishing edge the last layer seen
//! while printing is reported, since NanoDLP clears its layer fields as soon
//! as the job ends.

use orion_shared::{CanonicalStatus, FileData, PhysicalState, PrintData, RawStatus};

use super::state_handler::Canonicalized;

/// Raw `CurrentHeight` units per millimetre on stock NanoDLP machines.
pub const DEFAULT_HEIGHT_SCALE: f64 = 1000.0;

pub fn height_to_mm(raw_height: Option<f64>, height_scale: f64) -> f64 {
    match raw_height {
        Some(h) if height_scale > 0.0 => h / height_scale,
        _ => 0.0,
    }
}

pub fn nano_status_to_canonical(
    raw: &RawStatus,
    state: &Canonicalized,
    height_scale: f64,
) -> CanonicalStatus {
    let physical_state = PhysicalState {
        z: height_to_mm(raw.current_height, height_scale),
        curing: raw.curing.unwrap_or(false),
    };

    CanonicalStatus {
        status: state.status,
        paused: raw.paused,
        finished: state.finished,
        physical_state,
        print_data: print_data(raw, state),
    }
}

fn print_data(raw: &RawStatus, state: &Canonicalized) -> Option<PrintData> {
    let active = raw.printing || state.status.is_active();
    if !active && !state.finished && raw.file.is_none() {
        return None;
    }

    let layer_count = raw
        .layers_count
        .or(state.last_layer_count)
        .or_else(|| raw.file.as_ref().map(|f| f.layer_count))
        .unwrap_or(0);

    let layer = if state.finished {
        state
            .last_layer
            .or(raw.layer_id)
            .or(Some(layer_count).filter(|count| *count > 0))
    } else {
        raw.layer_id
    };

    let file_data = raw.file.as_ref().map(|file| FileData {
        name: file.name.clone(),
        path: file.path.clone(),
    });

    Some(PrintData { layer_count, layer, file_data })
}

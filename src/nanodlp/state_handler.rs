// src/nanodlp/state_handler.rs - Edge-triggered canonicalization of NanoDLP states
use orion_shared::{PrintStatus, RawStatus};

pub const STATE_IDLE: i64 = 0;
pub const STATE_PRINTING: i64 = 1;

/// Label for a raw state code. Codes other than idle/printing have no known
/// meaning and are reported as [`PrintStatus::Unknown`].
pub fn status_for_code(code: i64) -> PrintStatus {
    match code {
        STATE_IDLE => PrintStatus::Idle,
        STATE_PRINTING => PrintStatus::Printing,
        _ => PrintStatus::Unknown,
    }
}

/// State code of a snapshot. NanoDLP sometimes omits `State`; the `Printing`
/// flag stands in for it then.
pub fn effective_code(raw: &RawStatus) -> i64 {
    raw.state_code
        .unwrap_or(if raw.printing { STATE_PRINTING } else { STATE_IDLE })
}

/// Result of one [`StateHandler::canonicalize`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canonicalized {
    pub status: PrintStatus,
    /// True only for the call observing the printing -> idle edge.
    pub finished: bool,
    /// Layer last reported while the job was printing.
    pub last_layer: Option<u32>,
    pub last_layer_count: Option<u32>,
}

/// Tracks the previous state code so that job completion is reported once, on
/// the transition, instead of on every idle poll.
#[derive(Debug, Clone, Default)]
pub struct StateHandler {
    previous_code: Option<i64>,
    last_layer: Option<u32>,
    last_layer_count: Option<u32>,
}

impl StateHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn canonicalize(&mut self, raw: &RawStatus) -> Canonicalized {
        let code = effective_code(raw);
        let mut status = status_for_code(code);
        if status == PrintStatus::Printing && raw.paused {
            status = PrintStatus::Paused;
        }

        let finished = self.previous_code == Some(STATE_PRINTING)
            && code == STATE_IDLE
            && raw.layers_count.is_some();

        if code == STATE_PRINTING {
            if raw.layer_id.is_some() {
                self.last_layer = raw.layer_id;
            }
            if raw.layers_count.is_some() {
                self.last_layer_count = raw.layers_count;
            }
        }

        let result = Canonicalized {
            status,
            finished,
            last_layer: self.last_layer,
            last_layer_count: self.last_layer_count,
        };

        if code != STATE_PRINTING {
            self.last_layer = None;
            self.last_layer_count = None;
        }
        self.previous_code = Some(code);

        if finished {
            tracing::info!(
                layer = ?result.last_layer,
                layers = ?raw.layers_count,
                "print job finished"
            );
        }
        result
    }

    /// Forgets the previous code; the next call cannot report `finished`.
    pub fn reset(&mut self) {
        self.previous_code = None;
        self.last_layer = None;
        self.last_layer_count = None;
    }

    pub fn previous_code(&self) -> Option<i64> {
        self.previous_code
    }
}

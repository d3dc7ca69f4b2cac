// calibration.rs

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::*;

/// Mechanical bounce on the zero button shows up as bursts of edges;
/// edges closer together than this are treated as one press.
pub const ZERO_DEBOUNCE: Duration = Duration::from_millis(50);

/// Zero-offset state for the depth sensor. The offset is written from the
/// button-press context and read by the sampling loop on every cycle, so
/// both sides go through the lock. Only the latest capture is kept.
pub struct Calibration {
    offset: Mutex<f64>,
    last_edge: Mutex<Option<Instant>>,
    debounce: Duration,
}

impl Calibration {
    pub fn new() -> Self {
        Self::with_debounce(ZERO_DEBOUNCE)
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        Calibration {
            offset: Mutex::new(0.0),
            last_edge: Mutex::new(None),
            debounce,
        }
    }

    pub fn offset(&self) -> f64 {
        *self.offset.lock()
    }

    /// Store the current raw depth as the new zero offset, replacing any
    /// prior value. Returns `None` when the edge fell inside the debounce
    /// window and was ignored.
    pub fn capture_zero(&self, raw_depth_inches: f64) -> Option<f64> {
        let now = Instant::now();
        {
            let mut last = self.last_edge.lock();
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.debounce {
                    debug!("Zero button edge inside debounce window, ignored.");
                    return None;
                }
            }
            *last = Some(now);
        }
        *self.offset.lock() = raw_depth_inches;
        info!("Setting offset to {raw_depth_inches:.2}");
        Some(raw_depth_inches)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new()
    }
}


// EOF

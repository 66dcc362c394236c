use serde::{Deserialize, Serialize};

use crate::settings::MovementThresholds;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MovementClass {
    Idle,
    Walking,
    Fast,
    Unknown,
}

/// Map an accelerometer-derived speed to its band. Bands are half-open and contiguous, so every
/// finite non-negative speed lands in exactly one. Negative or NaN input is `Unknown`.
pub fn classify(speed: f64, thresholds: &MovementThresholds) -> MovementClass {
    if !(speed >= 0.0) {
        return MovementClass::Unknown;
    }
    if speed < thresholds.idle_below {
        MovementClass::Idle
    } else if speed < thresholds.walking_below {
        MovementClass::Walking
    } else if speed < thresholds.fast_below {
        MovementClass::Fast
    } else {
        MovementClass::Unknown
    }
}

/// Speed estimate from consecutive accelerometer magnitudes: mean absolute delta per second.
pub fn speed_from_deltas(magnitudes: &[f64], sample_interval_secs: f64) -> Option<f64> {
    if magnitudes.len() < 2 || !(sample_interval_secs > 0.0) {
        return None;
    }
    let total: f64 = magnitudes
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).abs())
        .sum();
    Some(total / (magnitudes.len() - 1) as f64 / sample_interval_secs)
}

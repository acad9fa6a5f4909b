//! Waveform feature extraction
//!
//! A completed (averaged) window is smoothed with a centred moving average,
//! then searched for its trough after the pulse artefact and for the peak
//! immediately preceding that trough. Positions are located on the smoothed
//! curve but values are reported from the unsmoothed one.

use super::timing::WindowTiming;
use serde::Serialize;

/// Scalars extracted from one captured window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowFeatures {
    /// Value at the trough
    pub y_min: f64,
    /// Value at the peak preceding the trough
    pub y_max: f64,
    /// Timestamp of the trough
    pub x_min: i64,
    /// Timestamp of the peak
    pub x_max: i64,
    /// `y_max - y_min`
    pub peak_to_peak: f64,
    /// Trough latency from window start in milliseconds
    pub latency_ms: f64,
    /// Peak-to-trough rate of change, normalised by sample rate
    pub slope: f64,
}

/// Centred moving average of radius `radius` over the interior of `raw`
///
/// Indices closer than `radius` to either edge keep their raw value.
/// `out` must be the same length as `raw`.
pub fn smooth_into(raw: &[f64], radius: usize, out: &mut [f64]) {
    out.copy_from_slice(raw);

    let len = raw.len();
    let width = 2 * radius + 1;
    if radius == 0 || len < width {
        return;
    }

    let mut sum: f64 = raw[..width].iter().sum();
    for t in radius..len - radius {
        out[t] = sum / width as f64;
        if t + radius + 1 < len {
            sum += raw[t + radius + 1] - raw[t - radius];
        }
    }
}

/// Extract features from an averaged window
///
/// `smoothed` is scratch space of the window length. Returns `None` when the
/// window is too short to leave any samples after the pulse exclusion span.
pub fn extract_features(
    window: &[f64],
    timestamps: &[i64],
    smoothed: &mut [f64],
    timing: &WindowTiming,
) -> Option<WindowFeatures> {
    let len = window.len();
    if len == 0 || timestamps.len() != len || smoothed.len() != len {
        return None;
    }

    smooth_into(window, timing.smoothing_radius, smoothed);

    // Trough: global minimum of the smoothed curve past the pulse artefact
    let mut min_index = None;
    let mut min_value = f64::INFINITY;
    for (t, &v) in smoothed.iter().enumerate().skip(timing.pulse_length) {
        if v < min_value {
            min_value = v;
            min_index = Some(t);
        }
    }
    let min_index = min_index?;

    // Peak: climb backwards from the trough while the curve keeps rising
    let mut max_index = min_index;
    while max_index > 0 && smoothed[max_index - 1] > smoothed[max_index] {
        max_index -= 1;
    }

    let y_min = window[min_index];
    let y_max = window[max_index];
    let x_min = timestamps[min_index];
    let x_max = timestamps[max_index];
    let sample_rate = timing.sample_rate;

    let latency_ms =
        (timing.pulse_length as f64 + (x_min - timestamps[0]) as f64) / sample_rate * 1000.0;

    let slope = if x_max == x_min {
        0.0
    } else {
        (y_max - y_min) / (x_max - x_min).abs() as f64 / sample_rate
    };

    Some(WindowFeatures {
        y_min,
        y_max,
        x_min,
        x_max,
        peak_to_peak: y_max - y_min,
        latency_ms,
        slope,
    })
}

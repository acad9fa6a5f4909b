//! Sample-rate dependent window constants
//!
//! Window, pulse and smoothing lengths are specified in milliseconds and
//! converted to sample counts (rounded up) whenever a channel's sample rate
//! becomes known or changes.

use crate::config::EngineConfig;

/// Sample counts derived from a sample rate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowTiming {
    /// Sample rate in Hz these lengths were computed for
    pub sample_rate: f64,
    /// Capture window length in samples
    pub window_length: usize,
    /// Output pulse length in samples (also the artefact exclusion span)
    pub pulse_length: usize,
    /// Radius of the centred moving average used before feature extraction
    pub smoothing_radius: usize,
}

impl WindowTiming {
    /// Compute lengths from explicit durations in milliseconds
    ///
    /// Returns `None` when the sample rate is not a positive finite number.
    ///
    /// # Example
    /// ```
    /// use stimdetector_core::detect::timing::WindowTiming;
    ///
    /// let timing = WindowTiming::new(1000.0, 40.0, 5.0, 5.0).unwrap();
    /// assert_eq!(timing.window_length, 40);
    /// assert_eq!(timing.pulse_length, 5);
    /// ```
    pub fn new(sample_rate: f64, window_ms: f64, pulse_ms: f64, smoothing_ms: f64) -> Option<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return None;
        }

        let samples = |ms: f64| (sample_rate * ms / 1000.0).ceil().max(0.0) as usize;

        Some(Self {
            sample_rate,
            window_length: samples(window_ms).max(1),
            pulse_length: samples(pulse_ms),
            smoothing_radius: samples(smoothing_ms),
        })
    }

    /// Compute lengths using the durations of an engine configuration
    pub fn from_config(sample_rate: f64, config: &EngineConfig) -> Option<Self> {
        Self::new(
            sample_rate,
            config.window_ms,
            config.pulse_ms,
            config.smoothing_ms,
        )
    }
}

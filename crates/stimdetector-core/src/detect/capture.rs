//! Capture window and stimulus-locked average
//!
//! A window is opened by a trigger and then filled one sample per call until
//! it holds `window_length` samples, even across buffer boundaries. A full
//! window is then committed into a per-position running average that spans
//! every window completed since the last split or reset. An aborted window
//! never reaches the average.
//!
//! All buffers are sized once per sample-rate change and reused afterwards.

use super::features::{extract_features, WindowFeatures};
use super::timing::WindowTiming;
use crate::stats::running::running_mean;

/// Outcome of feeding one sample to a capture window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// No window is open; the sample was ignored
    Idle,
    /// Sample stored, window still filling
    Capturing,
    /// Sample stored and the window is now full (and closed)
    Complete,
}

/// Per-position running average across captured windows
#[derive(Debug, Clone, Default)]
pub struct WindowAverage {
    values: Vec<f64>,
    sweeps: u64,
}

impl WindowAverage {
    fn resize(&mut self, len: usize) {
        self.values.clear();
        self.values.resize(len, 0.0);
        self.sweeps = 0;
    }

    fn commit(&mut self, samples: &[f32]) {
        for (value, &sample) in self.values.iter_mut().zip(samples) {
            *value = running_mean(*value, self.sweeps, sample as f64);
        }
        self.sweeps += 1;
    }

    /// Averaged value at each window position
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of windows contributing to the average
    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }
}

/// Capture buffers for one detector module
#[derive(Debug, Clone, Default)]
pub struct CaptureWindow {
    raw: Vec<f32>,
    timestamps: Vec<i64>,
    smoothed: Vec<f64>,
    average: WindowAverage,
    /// Next write index; `None` while no window is open
    position: Option<usize>,
}

impl CaptureWindow {
    /// Allocate buffers for windows of `len` samples
    pub fn with_length(len: usize) -> Self {
        let mut window = Self::default();
        window.resize(len);
        window
    }

    /// Re-size every buffer, discarding the average and any open window
    pub fn resize(&mut self, len: usize) {
        self.raw.clear();
        self.raw.resize(len, 0.0);
        self.timestamps.clear();
        self.timestamps.resize(len, 0);
        self.smoothed.clear();
        self.smoothed.resize(len, 0.0);
        self.average.resize(len);
        self.position = None;
    }

    /// Window length in samples
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// True when the buffers have not been sized yet
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// True while a window is being filled
    pub fn is_open(&self) -> bool {
        self.position.is_some()
    }

    /// Index the next sample will be written to, if a window is open
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    /// Open a new window at the next sample
    ///
    /// Returns `false` (and leaves the current window alone) if one is
    /// already open or the buffers are unsized.
    pub fn open(&mut self) -> bool {
        if self.is_open() || self.is_empty() {
            return false;
        }
        self.position = Some(0);
        true
    }

    /// Store one sample into the open window
    ///
    /// On [`CaptureStatus::Complete`] the window is closed but not yet part
    /// of the average; call [`CaptureWindow::commit`] to fold it in.
    pub fn push(&mut self, sample: f32, timestamp: i64) -> CaptureStatus {
        let Some(index) = self.position else {
            return CaptureStatus::Idle;
        };

        self.raw[index] = sample;
        self.timestamps[index] = timestamp;

        let next = index + 1;
        if next >= self.raw.len() {
            self.position = None;
            CaptureStatus::Complete
        } else {
            self.position = Some(next);
            CaptureStatus::Capturing
        }
    }

    /// Abandon an open window without completing it
    pub fn abort(&mut self) {
        self.position = None;
    }

    /// Fold the last completed window into the stimulus-locked average
    pub fn commit(&mut self) {
        self.average.commit(&self.raw);
    }

    /// Replace the average with the last completed window alone
    pub fn recommit_alone(&mut self) {
        self.average.sweeps = 0;
        self.average.commit(&self.raw);
    }

    /// Restart the stimulus-locked average; the next window overwrites it
    pub fn restart_average(&mut self) {
        self.average.sweeps = 0;
    }

    /// Zero the stimulus-locked average and its sweep count
    pub fn clear_average(&mut self) {
        self.average.values.fill(0.0);
        self.average.sweeps = 0;
    }

    /// Raw samples of the most recent window
    pub fn raw(&self) -> &[f32] {
        &self.raw
    }

    /// Timestamps of the most recent window
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Stimulus-locked average
    pub fn average(&self) -> &WindowAverage {
        &self.average
    }

    /// Smoothed copy of the average from the last extraction
    pub fn smoothed(&self) -> &[f64] {
        &self.smoothed
    }

    /// Extract features from the averaged window
    pub fn extract(&mut self, timing: &WindowTiming) -> Option<WindowFeatures> {
        extract_features(
            &self.average.values,
            &self.timestamps,
            &mut self.smoothed,
            timing,
        )
    }
}

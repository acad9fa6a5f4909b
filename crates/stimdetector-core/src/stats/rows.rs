//! Row aggregation matrix
//!
//! Completed windows are folded into the active row as running means of their
//! features. The operator can split (start a fresh row, keeping the old ones)
//! or reset (discard all rows).

use super::running::running_mean;
use crate::detect::features::WindowFeatures;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Running means of window features for one aggregation bucket
#[derive(Debug, Clone, PartialEq)]
pub struct RowStats {
    /// Number of windows folded into this row
    pub count: u64,
    /// Mean trough value
    pub y_min: f64,
    /// Mean peak value
    pub y_max: f64,
    /// Mean latency to the trough (ms)
    pub latency_ms: f64,
    /// Mean peak-to-trough slope
    pub slope: f64,
    /// When this row became active
    pub started_at: DateTime<Utc>,
}

impl RowStats {
    /// Create an empty row
    pub fn new() -> Self {
        Self {
            count: 0,
            y_min: 0.0,
            y_max: 0.0,
            latency_ms: 0.0,
            slope: 0.0,
            started_at: Utc::now(),
        }
    }

    /// Fold one window's features, weighting prior history by the current count
    pub fn fold(&mut self, features: &WindowFeatures) {
        let n = self.count;
        self.y_min = running_mean(self.y_min, n, features.y_min);
        self.y_max = running_mean(self.y_max, n, features.y_max);
        self.latency_ms = running_mean(self.latency_ms, n, features.latency_ms);
        self.slope = running_mean(self.slope, n, features.slope);
        self.count = n + 1;
    }

    /// Peak-to-peak is derived at read time, never stored
    pub fn peak_to_peak(&self) -> f64 {
        self.y_max - self.y_min
    }

    fn summary(&self, index: usize) -> RowSummary {
        RowSummary {
            index,
            y_min: self.y_min,
            y_max: self.y_max,
            peak_to_peak: self.peak_to_peak(),
            latency_ms: self.latency_ms,
            slope: self.slope,
            count: self.count,
            started_at: self.started_at,
        }
    }
}

impl Default for RowStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only snapshot of a row, suitable for polling by a display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSummary {
    pub index: usize,
    pub y_min: f64,
    pub y_max: f64,
    pub peak_to_peak: f64,
    pub latency_ms: f64,
    pub slope: f64,
    pub count: u64,
    pub started_at: DateTime<Utc>,
}

/// Ordered rows; the last row is always the active one
#[derive(Debug, Clone)]
pub struct RowMatrix {
    rows: Vec<RowStats>,
}

impl RowMatrix {
    /// Create a matrix holding a single empty row
    pub fn new() -> Self {
        Self {
            rows: vec![RowStats::new()],
        }
    }

    /// Index of the row currently receiving folds
    pub fn active_index(&self) -> usize {
        self.rows.len() - 1
    }

    /// The row currently receiving folds
    pub fn active(&self) -> &RowStats {
        &self.rows[self.active_index()]
    }

    /// Fold a completed window into the active row
    pub fn fold(&mut self, features: &WindowFeatures) {
        let active = self.active_index();
        self.rows[active].fold(features);
    }

    /// Start a new empty row; earlier rows are left untouched
    pub fn split(&mut self) {
        self.rows.push(RowStats::new());
    }

    /// Discard every row and start over with a single empty one
    pub fn reset(&mut self) {
        self.rows.clear();
        self.rows.push(RowStats::new());
    }

    /// Number of rows (completed plus active)
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Never true; a matrix always holds its active row
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Borrow the raw rows
    pub fn rows(&self) -> &[RowStats] {
        &self.rows
    }

    /// Snapshot of every row up to and including the active one
    pub fn summaries(&self) -> Vec<RowSummary> {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| row.summary(i))
            .collect()
    }
}

impl Default for RowMatrix {
    fn default() -> Self {
        Self::new()
    }
}

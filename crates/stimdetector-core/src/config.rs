//! Engine configuration and persisted module settings
//!
//! [`EngineConfig`] is loaded from a JSON file, falling back to defaults for
//! missing fields or an unreadable file. [`ModuleConfig`] is the per-module
//! record an external persistence layer stores and restores.

use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_threshold() -> f32 {
    crate::DEFAULT_THRESHOLD
}

fn default_window_ms() -> f64 {
    40.0
}

fn default_pulse_ms() -> f64 {
    5.0
}

fn default_smoothing_ms() -> f64 {
    5.0
}

fn default_artifact_ratio() -> f32 {
    5.0
}

fn default_max_modules() -> usize {
    crate::MAX_MODULES
}

/// Engine-wide detection constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Threshold given to newly added modules
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
    /// Capture window duration
    #[serde(default = "default_window_ms")]
    pub window_ms: f64,
    /// Output pulse duration, also excluded from the trough search
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: f64,
    /// Smoothing radius used before feature extraction
    #[serde(default = "default_smoothing_ms")]
    pub smoothing_ms: f64,
    /// Differences at or above `artifact_ratio * threshold` are rejected
    #[serde(default = "default_artifact_ratio")]
    pub artifact_ratio: f32,
    /// Maximum number of modules
    #[serde(default = "default_max_modules")]
    pub max_modules: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            window_ms: default_window_ms(),
            pulse_ms: default_pulse_ms(),
            smoothing_ms: default_smoothing_ms(),
            artifact_ratio: default_artifact_ratio(),
            max_modules: default_max_modules(),
        }
    }
}

impl EngineConfig {
    /// Load config from disk, falling back to defaults on any error
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded engine config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse engine config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No engine config found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Engine config saved");
        Ok(())
    }
}

/// Persisted per-module settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub input_channel: Option<usize>,
    #[serde(default)]
    pub output_channel: Option<usize>,
    #[serde(default)]
    pub gate_channel: Option<usize>,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default)]
    pub apply_difference: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            input_channel: None,
            output_channel: None,
            gate_channel: None,
            threshold: default_threshold(),
            apply_difference: false,
        }
    }
}

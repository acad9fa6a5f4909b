//! Stimdetector Core - Stimulus detection, response capture and online averaging
//!
//! This library provides the real-time core of a multi-channel stimulus/response
//! detector. Each detector module watches one input channel for a sharp transient
//! (or an external gate pulse), emits a timed digital output pulse, captures a
//! fixed-length response window and folds the extracted waveform features into
//! operator-controlled aggregation rows.

pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod host;
pub mod signal;
pub mod stats;
pub mod stream;

pub use config::{EngineConfig, ModuleConfig};
pub use detect::features::WindowFeatures;
pub use detect::module::ModuleId;
pub use engine::{ControlHandle, ModuleInfo, StimEngine, WindowSummary};
pub use error::ControlError;
pub use host::{DigitalEvent, Host, SampleBuffer, TtlEvent};
pub use stats::rows::{RowMatrix, RowSummary};
pub use stream::RealtimeStream;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (YYYY-MM-DD), stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default detection threshold for new modules (signal units per sample)
pub const DEFAULT_THRESHOLD: f32 = 150.0;

/// Lower bound (exclusive) for a module threshold
pub const MIN_THRESHOLD: f32 = 0.01;

/// Upper bound (exclusive) for a module threshold
pub const MAX_THRESHOLD: f32 = 10000.0;

/// Number of TTL lines addressable by output and gate channels (one 8-bit word)
pub const TTL_LINES: usize = 8;

/// Maximum number of detector modules
pub const MAX_MODULES: usize = 8;

//! Stimdetector - real-time stimulus detection and evoked response averaging
//!
//! This library re-exports the detection engine, host interface and
//! aggregation types from `stimdetector-core`.

pub use stimdetector_core::{config, detect, engine, error, host, signal, stats, stream};

pub use stimdetector_core::{
    ControlError, ControlHandle, DigitalEvent, EngineConfig, Host, ModuleConfig, ModuleId,
    ModuleInfo, RealtimeStream, RowMatrix, RowSummary, SampleBuffer, StimEngine, TtlEvent,
    WindowFeatures, WindowSummary,
};
pub use stimdetector_core::{
    BUILD_DATE, DEFAULT_THRESHOLD, MAX_MODULES, MAX_THRESHOLD, MIN_THRESHOLD, TTL_LINES, VERSION,
};

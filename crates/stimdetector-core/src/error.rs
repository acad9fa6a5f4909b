//! Control-path errors
//!
//! Every setter validates its input before touching any state, so an `Err`
//! always means nothing was applied.

use crate::detect::module::ModuleId;
use thiserror::Error;

/// Errors returned by control operations on the engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("Unknown module: {0}")]
    UnknownModule(ModuleId),

    #[error("Threshold out of range: {0} (must be within {min}..{max})", min = crate::MIN_THRESHOLD, max = crate::MAX_THRESHOLD)]
    ThresholdOutOfRange(f32),

    #[error("Input channel {channel} out of range ({available} channels available)")]
    InputChannelOutOfRange { channel: usize, available: usize },

    #[error("Output line {channel} out of range ({lines} TTL lines)")]
    OutputChannelOutOfRange { channel: usize, lines: usize },

    #[error("Gate line {channel} out of range ({lines} TTL lines)")]
    GateChannelOutOfRange { channel: usize, lines: usize },

    #[error("Module limit reached ({0} modules)")]
    TooManyModules(usize),
}

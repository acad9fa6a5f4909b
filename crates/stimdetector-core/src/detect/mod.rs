//! Detection and capture
//!
//! This module contains the per-module real-time machinery:
//! - Sample-rate dependent window constants ([`timing`])
//! - Capture window and stimulus-locked average ([`capture`])
//! - Waveform feature extraction ([`features`])
//! - Module state and the trigger/pulse state machine ([`module`])

pub mod capture;
pub mod features;
pub mod module;
pub mod timing;

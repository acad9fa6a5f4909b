//! Online statistics
//!
//! - Incremental running mean ([`running`])
//! - Row aggregation matrix of waveform features ([`rows`])

pub mod rows;
pub mod running;

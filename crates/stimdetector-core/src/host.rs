//! Host collaborator interface
//!
//! The engine does not own an acquisition device. The host hands it one
//! multi-channel buffer per callback, tells it the sample rate and timestamp
//! of each channel, delivers gate TTL events and receives the digital output
//! events produced while processing.

use crate::detect::module::ModuleId;
use serde::Serialize;

/// A TTL transition delivered to the engine on a gate line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlEvent {
    /// TTL line number
    pub line: usize,
    /// True for a rising (on) edge
    pub asserted: bool,
}

impl TtlEvent {
    /// Rising edge on `line`
    pub fn on(line: usize) -> Self {
        Self {
            line,
            asserted: true,
        }
    }

    /// Falling edge on `line`
    pub fn off(line: usize) -> Self {
        Self {
            line,
            asserted: false,
        }
    }
}

/// A digital output transition emitted by a detector module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DigitalEvent {
    /// Module that produced the event
    pub module: ModuleId,
    /// Output TTL line
    pub line: usize,
    /// True when the line is asserted
    pub asserted: bool,
    /// 8-bit TTL word: `1 << line` when asserted, 0 otherwise
    pub ttl_word: u8,
    /// Sample offset within the buffer being processed
    pub sample_offset: usize,
    /// Absolute sample timestamp (`channel timestamp + sample_offset`)
    pub timestamp: i64,
}

/// Services the engine needs from its host
pub trait Host {
    /// Sample rate of a channel in Hz
    fn sample_rate(&self, channel: usize) -> f64;

    /// Timestamp of the first sample of the current buffer on a channel
    fn timestamp(&self, channel: usize) -> i64;

    /// Number of input channels the host currently provides
    fn num_input_channels(&self) -> usize;

    /// Emit a digital output event
    fn emit_digital_event(&mut self, event: DigitalEvent);
}

/// Channel-major sample buffer shared by every module during one callback
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
}

impl SampleBuffer {
    /// Allocate a zeroed buffer
    pub fn new(num_channels: usize, num_samples: usize) -> Self {
        Self {
            channels: vec![vec![0.0; num_samples]; num_channels],
        }
    }

    /// Wrap existing per-channel sample vectors
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Self {
        Self { channels }
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples on a channel (0 for a missing channel)
    pub fn num_samples(&self, channel: usize) -> usize {
        self.channels.get(channel).map(Vec::len).unwrap_or(0)
    }

    /// Samples of a channel
    pub fn channel(&self, channel: usize) -> Option<&[f32]> {
        self.channels.get(channel).map(Vec::as_slice)
    }

    /// Mutable samples of a channel
    pub fn channel_mut(&mut self, channel: usize) -> Option<&mut [f32]> {
        self.channels.get_mut(channel).map(Vec::as_mut_slice)
    }

    /// Consume the buffer, returning its channels
    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }
}

/// Host with a fixed sample rate that records emitted events
///
/// Timestamps start at zero and move forward with [`FixedRateHost::advance`].
#[derive(Debug, Clone)]
pub struct FixedRateHost {
    sample_rate: f64,
    num_channels: usize,
    timestamp: i64,
    events: Vec<DigitalEvent>,
}

impl FixedRateHost {
    /// Create a host for `num_channels` channels at `sample_rate` Hz
    pub fn new(sample_rate: f64, num_channels: usize) -> Self {
        Self {
            sample_rate,
            num_channels,
            timestamp: 0,
            events: Vec::new(),
        }
    }

    /// Move the timestamp forward by one buffer
    pub fn advance(&mut self, samples: usize) {
        self.timestamp += samples as i64;
    }

    /// Change the sample rate reported for every channel
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    /// Change the reported channel count
    pub fn set_num_channels(&mut self, num_channels: usize) {
        self.num_channels = num_channels;
    }

    /// Events emitted so far
    pub fn events(&self) -> &[DigitalEvent] {
        &self.events
    }

    /// Drain emitted events
    pub fn take_events(&mut self) -> Vec<DigitalEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Host for FixedRateHost {
    fn sample_rate(&self, _channel: usize) -> f64 {
        self.sample_rate
    }

    fn timestamp(&self, _channel: usize) -> i64 {
        self.timestamp
    }

    fn num_input_channels(&self) -> usize {
        self.num_channels
    }

    fn emit_digital_event(&mut self, event: DigitalEvent) {
        self.events.push(event);
    }
}

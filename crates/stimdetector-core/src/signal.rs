//! Synthetic evoked-response signal
//!
//! Produces a periodic stimulus train the way an electrode near a stimulated
//! nerve would see it: a flat noisy baseline, a square stimulus artefact at
//! the start of every cycle, then a biphasic evoked response (positive peak
//! followed by a negative trough) a few milliseconds later.
//!
//! Used by the demo binary, the integration tests and the benchmarks.

use std::f32::consts::PI;

/// Default stimulation period (5 Hz)
const DEFAULT_PERIOD_MS: f64 = 200.0;

/// Artefact duration
const ARTIFACT_MS: f64 = 2.0;

/// Response onset after the stimulus
const RESPONSE_ONSET_MS: f64 = 8.0;

/// Duration of one full response period (peak then trough)
const RESPONSE_WIDTH_MS: f64 = 16.0;

/// Artefact height; a default-threshold detector triggers on this step
const ARTIFACT_AMPLITUDE: f32 = 300.0;

const RESPONSE_AMPLITUDE: f32 = 80.0;

const NOISE_AMPLITUDE: f32 = 2.0;

const NOISE_SEED: u32 = 0x5EED_1234;

fn samples(sample_rate: f64, ms: f64) -> usize {
    (sample_rate * ms / 1000.0).ceil() as usize
}

/// Periodic stimulus artefact plus evoked response generator
///
/// # Example
/// ```
/// use stimdetector_core::signal::EvokedSignal;
///
/// let mut signal = EvokedSignal::new(1000.0);
/// let (_, is_stimulus) = signal.next_sample();
/// assert!(is_stimulus);
/// assert_eq!(signal.period(), 200);
/// ```
#[derive(Debug, Clone)]
pub struct EvokedSignal {
    sample_rate: f64,
    period: usize,
    artifact_length: usize,
    response_onset: usize,
    response_width: usize,
    cycle_position: usize,
    baseline: f32,
    artifact_amplitude: f32,
    response_amplitude: f32,
    noise_amplitude: f32,
    noise_seed: u32,
}

impl EvokedSignal {
    /// Create a generator with the default 5 Hz stimulus train
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            period: samples(sample_rate, DEFAULT_PERIOD_MS).max(1),
            artifact_length: samples(sample_rate, ARTIFACT_MS),
            response_onset: samples(sample_rate, RESPONSE_ONSET_MS),
            response_width: samples(sample_rate, RESPONSE_WIDTH_MS).max(1),
            cycle_position: 0,
            baseline: 0.0,
            artifact_amplitude: ARTIFACT_AMPLITUDE,
            response_amplitude: RESPONSE_AMPLITUDE,
            noise_amplitude: NOISE_AMPLITUDE,
            noise_seed: NOISE_SEED,
        }
    }

    /// Set the stimulation period
    pub fn with_period_ms(mut self, period_ms: f64) -> Self {
        self.period = samples(self.sample_rate, period_ms).max(1);
        self
    }

    /// Set the stimulation period in samples
    pub fn with_period_samples(mut self, period: usize) -> Self {
        self.period = period.max(1);
        self
    }

    pub fn with_baseline(mut self, baseline: f32) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_artifact_amplitude(mut self, amplitude: f32) -> Self {
        self.artifact_amplitude = amplitude;
        self
    }

    pub fn with_response_amplitude(mut self, amplitude: f32) -> Self {
        self.response_amplitude = amplitude;
        self
    }

    /// Noise amplitude; 0 gives a fully deterministic waveform
    pub fn with_noise(mut self, amplitude: f32) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    /// Next sample and whether it is the first sample of a stimulus
    pub fn next_sample(&mut self) -> (f32, bool) {
        let t = self.cycle_position;
        let is_stimulus = t == 0;

        let mut sample = self.baseline + self.generate_noise() * self.noise_amplitude;
        if t < self.artifact_length {
            sample += self.artifact_amplitude;
        } else if t >= self.response_onset && t < self.response_onset + self.response_width {
            let phase = (t - self.response_onset) as f32 / self.response_width as f32;
            sample += self.response_amplitude * (2.0 * PI * phase).sin();
        }

        self.cycle_position = (self.cycle_position + 1) % self.period;
        (sample, is_stimulus)
    }

    fn generate_noise(&mut self) -> f32 {
        if self.noise_amplitude == 0.0 {
            return 0.0;
        }
        self.noise_seed = self.noise_seed.wrapping_mul(1103515245).wrapping_add(12345);
        let bits = (self.noise_seed >> 16) & 0x7FFF;
        (bits as f32 / 16384.0) - 1.0
    }

    /// Fill a buffer, returning the offsets where stimuli started
    pub fn fill_buffer(&mut self, buffer: &mut [f32]) -> Vec<usize> {
        let mut stimuli = Vec::new();
        for (i, slot) in buffer.iter_mut().enumerate() {
            let (sample, is_stimulus) = self.next_sample();
            *slot = sample;
            if is_stimulus {
                stimuli.push(i);
            }
        }
        stimuli
    }

    /// Samples between two stimuli
    pub fn period(&self) -> usize {
        self.period
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Offset of the response trough from the stimulus, in samples
    pub fn trough_offset(&self) -> usize {
        self.response_onset + self.response_width * 3 / 4
    }

    /// Offset of the response peak from the stimulus, in samples
    pub fn peak_offset(&self) -> usize {
        self.response_onset + self.response_width / 4
    }

    /// Restart at the beginning of a stimulus cycle
    pub fn reset(&mut self) {
        self.cycle_position = 0;
        self.noise_seed = NOISE_SEED;
    }
}

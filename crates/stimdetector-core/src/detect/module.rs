//! Detector module state and trigger state machine
//!
//! Each module is split in two halves:
//!
//! - [`SharedModule`] is reachable from both the real-time path and the
//!   control path. Its settings are atomics (read once per buffer) and its
//!   aggregation rows sit behind a `Mutex` that the real-time path only takes
//!   to fold a completed window.
//! - [`DetectorModule`] is owned by the real-time path: previous sample and
//!   difference, the output pulse timer, the gate latch and the capture
//!   buffers. Nothing else touches it while a buffer is processed.
//!
//! Pulse timing and window capture are independent: a pulse is usually much
//! shorter than a window and the two run concurrently after a trigger.

use super::capture::{CaptureStatus, CaptureWindow};
use super::features::WindowFeatures;
use super::timing::WindowTiming;
use crate::config::EngineConfig;
use crate::host::{DigitalEvent, Host, TtlEvent};
use crate::stats::rows::{RowMatrix, RowSummary};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Stable identifier of a detector module; never reused by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleId(pub usize);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel for an unbound channel
const UNSET: usize = usize::MAX;

/// Channel binding stored as an atomic, `None` meaning unbound
#[derive(Debug)]
struct AtomicChannel(AtomicUsize);

impl AtomicChannel {
    fn new(channel: Option<usize>) -> Self {
        Self(AtomicUsize::new(channel.unwrap_or(UNSET)))
    }

    fn load(&self) -> Option<usize> {
        match self.0.load(Ordering::Acquire) {
            UNSET => None,
            ch => Some(ch),
        }
    }

    fn store(&self, channel: Option<usize>) {
        self.0.store(channel.unwrap_or(UNSET), Ordering::Release);
    }
}

/// Plain copy of a module's settings taken at the start of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SettingsSnapshot {
    pub input_channel: Option<usize>,
    pub output_channel: Option<usize>,
    pub gate_channel: Option<usize>,
    pub threshold: f32,
    pub apply_difference: bool,
}

impl SettingsSnapshot {
    /// True when an external gate replaces self-triggering
    pub fn is_gated(&self) -> bool {
        self.gate_channel.is_some()
    }
}

/// Lock-free module settings written by the control path
#[derive(Debug)]
pub struct ModuleSettings {
    input_channel: AtomicChannel,
    output_channel: AtomicChannel,
    gate_channel: AtomicChannel,
    threshold: AtomicU32,
    apply_difference: AtomicBool,
    rebind_required: AtomicBool,
}

impl ModuleSettings {
    fn new(threshold: f32) -> Self {
        Self {
            input_channel: AtomicChannel::new(None),
            output_channel: AtomicChannel::new(None),
            gate_channel: AtomicChannel::new(None),
            threshold: AtomicU32::new(threshold.to_bits()),
            apply_difference: AtomicBool::new(false),
            rebind_required: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            input_channel: self.input_channel.load(),
            output_channel: self.output_channel.load(),
            gate_channel: self.gate_channel.load(),
            threshold: self.threshold(),
            apply_difference: self.apply_difference.load(Ordering::Acquire),
        }
    }

    pub fn input_channel(&self) -> Option<usize> {
        self.input_channel.load()
    }

    pub fn set_input_channel(&self, channel: Option<usize>) {
        self.input_channel.store(channel);
        self.rebind_required.store(false, Ordering::Release);
    }

    pub fn output_channel(&self) -> Option<usize> {
        self.output_channel.load()
    }

    pub fn set_output_channel(&self, channel: Option<usize>) {
        self.output_channel.store(channel);
    }

    pub fn gate_channel(&self) -> Option<usize> {
        self.gate_channel.load()
    }

    pub fn set_gate_channel(&self, channel: Option<usize>) {
        self.gate_channel.store(channel);
    }

    pub fn threshold(&self) -> f32 {
        f32::from_bits(self.threshold.load(Ordering::Acquire))
    }

    pub fn set_threshold(&self, threshold: f32) {
        self.threshold.store(threshold.to_bits(), Ordering::Release);
    }

    pub fn apply_difference(&self) -> bool {
        self.apply_difference.load(Ordering::Acquire)
    }

    pub fn set_apply_difference(&self, enabled: bool) {
        self.apply_difference.store(enabled, Ordering::Release);
    }

    /// True once the channel count changed under a bound input
    pub fn rebind_required(&self) -> bool {
        self.rebind_required.load(Ordering::Acquire)
    }

    /// Drop a stale input binding and flag the module for rebinding
    pub fn invalidate_input(&self) {
        self.input_channel.store(None);
        self.rebind_required.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FoldOutcome {
    Folded,
    Reset,
    Split(u64),
}

/// Aggregated results guarded by the module lock
#[derive(Debug, Default)]
struct Aggregates {
    rows: RowMatrix,
    last: Option<WindowFeatures>,
}

/// Module state visible to both the real-time and control paths
#[derive(Debug)]
pub struct SharedModule {
    id: ModuleId,
    settings: ModuleSettings,
    aggregates: Mutex<Aggregates>,
    /// Bumped by every split, under the aggregates lock
    split_epoch: AtomicU64,
    /// Bumped by every reset, under the aggregates lock
    reset_epoch: AtomicU64,
}

impl SharedModule {
    pub fn new(id: ModuleId, threshold: f32) -> Self {
        Self {
            id,
            settings: ModuleSettings::new(threshold),
            aggregates: Mutex::new(Aggregates::default()),
            split_epoch: AtomicU64::new(0),
            reset_epoch: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn settings(&self) -> &ModuleSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, Aggregates> {
        // Aggregates stay consistent even if a holder panicked mid-read
        self.aggregates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new aggregation row
    pub fn split_row(&self) -> usize {
        let mut agg = self.lock();
        agg.rows.split();
        self.split_epoch.fetch_add(1, Ordering::AcqRel);
        agg.rows.active_index()
    }

    /// Discard every row and the last window
    pub fn reset_aggregates(&self) {
        let mut agg = self.lock();
        agg.rows.reset();
        agg.last = None;
        self.reset_epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Snapshot of the row matrix
    pub fn row_summaries(&self) -> Vec<RowSummary> {
        self.lock().rows.summaries()
    }

    /// Number of rows, including the active one
    pub fn row_count(&self) -> usize {
        self.lock().rows.len()
    }

    /// Features of the last folded window with the active row's count
    pub fn last_window(&self) -> Option<(WindowFeatures, u64)> {
        let agg = self.lock();
        agg.last.map(|features| (features, agg.rows.active().count))
    }

    /// Fold a completed window into the active row
    ///
    /// Refused if a reset or split happened since the epochs the real-time
    /// path last saw, so the features never mix data across either boundary.
    fn fold(&self, features: &WindowFeatures, seen_reset: u64, seen_split: u64) -> FoldOutcome {
        let mut agg = self.lock();
        if self.reset_epoch.load(Ordering::Acquire) != seen_reset {
            return FoldOutcome::Reset;
        }
        let split = self.split_epoch.load(Ordering::Acquire);
        if split != seen_split {
            return FoldOutcome::Split(split);
        }
        agg.rows.fold(features);
        agg.last = Some(*features);
        FoldOutcome::Folded
    }

    fn split_epoch(&self) -> u64 {
        self.split_epoch.load(Ordering::Acquire)
    }

    fn reset_epoch(&self) -> u64 {
        self.reset_epoch.load(Ordering::Acquire)
    }
}

/// Output pulse timer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PulseTimer {
    active: bool,
    samples_since_start: usize,
}

impl PulseTimer {
    fn start(&mut self) {
        self.active = true;
        self.samples_since_start = 0;
    }

    /// Advance one sample; returns true when the pulse just ended
    fn tick(&mut self, pulse_length: usize) -> bool {
        if !self.active {
            return false;
        }
        self.samples_since_start += 1;
        if self.samples_since_start >= pulse_length {
            self.active = false;
            return true;
        }
        false
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn samples_since_start(&self) -> usize {
        self.samples_since_start
    }
}

/// Real-time half of a detector module
#[derive(Debug)]
pub struct DetectorModule {
    shared: std::sync::Arc<SharedModule>,
    settings: SettingsSnapshot,
    timing: Option<WindowTiming>,
    /// Last sample rate rejected by [`DetectorModule::prepare`]
    rejected_rate: Option<f64>,
    artifact_ratio: f32,
    last_sample: f32,
    last_difference: f32,
    /// Suppresses the trigger on the first sample ever seen on the input
    awaiting_first_sample: bool,
    pulse: PulseTimer,
    deassert_pending: bool,
    gate_armed: bool,
    capture: CaptureWindow,
    seen_split: u64,
    seen_reset: u64,
}

impl DetectorModule {
    pub fn new(shared: std::sync::Arc<SharedModule>) -> Self {
        let settings = shared.settings().snapshot();
        let seen_split = shared.split_epoch();
        let seen_reset = shared.reset_epoch();
        Self {
            shared,
            settings,
            timing: None,
            rejected_rate: None,
            artifact_ratio: EngineConfig::default().artifact_ratio,
            last_sample: 0.0,
            last_difference: 0.0,
            awaiting_first_sample: true,
            pulse: PulseTimer::default(),
            deassert_pending: false,
            gate_armed: false,
            capture: CaptureWindow::default(),
            seen_split,
            seen_reset,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.shared.id()
    }

    pub fn shared(&self) -> &std::sync::Arc<SharedModule> {
        &self.shared
    }

    pub fn timing(&self) -> Option<&WindowTiming> {
        self.timing.as_ref()
    }

    pub fn capture(&self) -> &CaptureWindow {
        &self.capture
    }

    pub fn pulse(&self) -> &PulseTimer {
        &self.pulse
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_open()
    }

    pub fn is_gate_armed(&self) -> bool {
        self.gate_armed
    }

    /// Apply a gate TTL transition
    ///
    /// A rising edge on the configured gate line arms the module unless a
    /// window is already open; a falling edge disarms a latch that has not
    /// opened a window yet.
    pub fn handle_ttl(&mut self, event: TtlEvent) {
        if self.settings.gate_channel != Some(event.line) {
            return;
        }

        if event.asserted {
            if self.capture.is_open() {
                tracing::trace!(module = %self.id(), line = event.line, "gate_ignored_window_open");
            } else {
                self.gate_armed = true;
                tracing::trace!(module = %self.id(), line = event.line, "gate_armed");
            }
        } else if self.gate_armed {
            self.gate_armed = false;
            tracing::trace!(module = %self.id(), line = event.line, "gate_disarmed");
        }
    }

    /// Drop any capture or pulse in progress without folding anything
    ///
    /// An active output pulse is deasserted at the start of the next buffer.
    pub fn enter_idle(&mut self) {
        if self.pulse.is_active() {
            self.pulse = PulseTimer::default();
            self.deassert_pending = true;
        }
        self.capture.abort();
        self.gate_armed = false;
    }

    /// Catch up with a reset issued by the control path
    pub fn apply_reset(&mut self) {
        self.seen_reset = self.shared.reset_epoch();
        self.seen_split = self.shared.split_epoch();
        self.enter_idle();
        self.capture.clear_average();
    }

    /// Input channel of the current settings snapshot
    pub fn input_channel(&self) -> Option<usize> {
        self.settings.input_channel
    }

    /// Take a fresh settings snapshot at the start of a buffer
    ///
    /// Reconciles resets issued by the control path and releases any output
    /// pulse that was interrupted. Must run before gate events of the buffer
    /// are dispatched so they see the current gate binding.
    pub fn sync<H: Host + ?Sized>(&mut self, host: &mut H) {
        let settings = self.shared.settings().snapshot();
        let timestamp = settings
            .input_channel
            .or(self.settings.input_channel)
            .map(|ch| host.timestamp(ch))
            .unwrap_or(0);

        if self.shared.reset_epoch() != self.seen_reset {
            tracing::debug!(module = %self.id(), "reset_applied");
            self.apply_reset();
        }

        let output_changed = settings.output_channel != self.settings.output_channel;
        if self.deassert_pending || (output_changed && self.pulse.is_active()) {
            // Release the old line rather than leaving it asserted
            if let Some(line) = self.settings.output_channel {
                self.emit(host, line, false, 0, timestamp);
            }
            self.deassert_pending = false;
            self.pulse = PulseTimer::default();
        }

        if settings.input_channel != self.settings.input_channel {
            self.rebind_input();
        }
        if settings.gate_channel != self.settings.gate_channel {
            self.gate_armed = false;
        }
        self.settings = settings;
    }

    /// Recompute window lengths if the sample rate changed
    ///
    /// Returns the input channel to process, or `None` if the module has no
    /// input binding or no usable sample rate and should be skipped.
    pub fn prepare(&mut self, sample_rate: f64, config: &EngineConfig) -> Option<usize> {
        self.artifact_ratio = config.artifact_ratio;

        let stale = self
            .timing
            .map(|t| t.sample_rate != sample_rate)
            .unwrap_or(true);
        let rejected = self
            .rejected_rate
            .is_some_and(|rate| rate.to_bits() == sample_rate.to_bits());
        if stale && !rejected {
            self.timing = WindowTiming::from_config(sample_rate, config);
            match self.timing {
                Some(timing) => {
                    self.rejected_rate = None;
                    tracing::info!(
                        module = %self.id(),
                        sample_rate,
                        window_length = timing.window_length,
                        pulse_length = timing.pulse_length,
                        smoothing_radius = timing.smoothing_radius,
                        "window_timing_updated"
                    );
                    self.capture.resize(timing.window_length);
                }
                None => {
                    tracing::warn!(module = %self.id(), sample_rate, "invalid_sample_rate");
                    self.rejected_rate = Some(sample_rate);
                    self.capture.abort();
                }
            }
        }

        self.timing.and(self.settings.input_channel)
    }

    fn rebind_input(&mut self) {
        self.last_sample = 0.0;
        self.last_difference = 0.0;
        self.awaiting_first_sample = true;
        self.capture.abort();
    }

    /// Run the state machine over one channel of the current buffer
    ///
    /// `samples` is the shared channel buffer; when difference mode is on the
    /// signed first difference is written back in place, so modules processed
    /// later on the same channel observe it.
    ///
    /// Only a threshold trigger drives the output line. In gated mode the
    /// gate edge already marks the stimulus, so the window opens without a
    /// pulse.
    pub fn process<H: Host + ?Sized>(&mut self, samples: &mut [f32], timestamp: i64, host: &mut H) {
        let Some(timing) = self.timing else {
            return;
        };

        for (offset, slot) in samples.iter_mut().enumerate() {
            let sample = *slot;
            let sample_timestamp = timestamp + offset as i64;
            let signed_difference = sample - self.last_sample;
            let difference = signed_difference.abs();

            if self.settings.is_gated() {
                if self.gate_armed && !self.capture.is_open() {
                    self.gate_armed = false;
                    self.open_window();
                    tracing::trace!(module = %self.id(), timestamp = sample_timestamp, "gated_window_opened");
                }
                self.tick_pulse(host, &timing, offset, sample_timestamp);
            } else if self.should_trigger(difference) {
                self.trigger(host, offset, sample_timestamp);
            } else {
                self.tick_pulse(host, &timing, offset, sample_timestamp);
            }

            self.last_sample = sample;
            self.last_difference = difference;
            self.awaiting_first_sample = false;

            if self.capture.push(sample, sample_timestamp) == CaptureStatus::Complete {
                self.complete_window(&timing);
            }

            if self.settings.apply_difference {
                *slot = signed_difference;
            }
        }
    }

    fn should_trigger(&self, difference: f32) -> bool {
        let threshold = self.settings.threshold;
        !self.awaiting_first_sample
            && !self.pulse.is_active()
            && !self.deassert_pending
            && !self.capture.is_open()
            && difference > self.last_difference
            && difference > threshold
            && difference < self.artifact_ratio * threshold
    }

    fn trigger<H: Host + ?Sized>(&mut self, host: &mut H, offset: usize, timestamp: i64) {
        if let Some(line) = self.settings.output_channel {
            self.emit(host, line, true, offset, timestamp);
        }
        self.pulse.start();
        self.open_window();
        tracing::trace!(module = %self.id(), timestamp, "stim_detected");
    }

    fn tick_pulse<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        timing: &WindowTiming,
        offset: usize,
        timestamp: i64,
    ) {
        if self.pulse.tick(timing.pulse_length) {
            if let Some(line) = self.settings.output_channel {
                self.emit(host, line, false, offset, timestamp);
            }
        }
    }

    fn open_window(&mut self) {
        self.capture.open();
    }

    fn complete_window(&mut self, timing: &WindowTiming) {
        // A split restarts the average, including a window that was already
        // open when it landed
        let split = self.shared.split_epoch();
        if split != self.seen_split {
            self.seen_split = split;
            self.capture.restart_average();
        }
        self.capture.commit();

        loop {
            let Some(features) = self.capture.extract(timing) else {
                tracing::debug!(module = %self.id(), "window_discarded_too_short");
                return;
            };

            match self.shared.fold(&features, self.seen_reset, self.seen_split) {
                FoldOutcome::Folded => {
                    tracing::debug!(
                        module = %self.id(),
                        y_min = features.y_min,
                        y_max = features.y_max,
                        latency_ms = features.latency_ms,
                        "window_folded"
                    );
                    return;
                }
                FoldOutcome::Reset => {
                    tracing::debug!(module = %self.id(), "window_discarded_after_reset");
                    self.apply_reset();
                    return;
                }
                FoldOutcome::Split(epoch) => {
                    // Split raced the extraction; start the new row from this window
                    tracing::debug!(module = %self.id(), "window_restarted_after_split");
                    self.seen_split = epoch;
                    self.capture.recommit_alone();
                }
            }
        }
    }

    fn emit<H: Host + ?Sized>(
        &self,
        host: &mut H,
        line: usize,
        asserted: bool,
        offset: usize,
        timestamp: i64,
    ) {
        let ttl_word = if asserted {
            1u8.checked_shl(line as u32).unwrap_or(0)
        } else {
            0
        };
        host.emit_digital_event(DigitalEvent {
            module: self.id(),
            line,
            asserted,
            ttl_word,
            sample_offset: offset,
            timestamp,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FixedRateHost;
    use std::sync::Arc;

    fn module(threshold: f32) -> DetectorModule {
        let shared = Arc::new(SharedModule::new(ModuleId(0), threshold));
        shared.settings().set_input_channel(Some(0));
        shared.settings().set_output_channel(Some(2));
        DetectorModule::new(shared)
    }

    fn run(module: &mut DetectorModule, host: &mut FixedRateHost, samples: &mut [f32]) {
        let config = EngineConfig::default();
        module.sync(host);
        if module.prepare(1000.0, &config).is_some() {
            let ts = host.timestamp(0);
            module.process(samples, ts, host);
        }
        host.advance(samples.len());
    }

    #[test]
    fn test_flat_signal_never_triggers() {
        let mut m = module(100.0);
        let mut host = FixedRateHost::new(1000.0, 1);
        let mut samples = vec![0.0f32; 500];
        run(&mut m, &mut host, &mut samples);

        assert!(host.events().is_empty());
        assert_eq!(m.shared().row_summaries()[0].count, 0);
    }

    #[test]
    fn test_first_sample_is_ignored() {
        let mut m = module(100.0);
        let mut host = FixedRateHost::new(1000.0, 1);
        // Starts high: would look like a 200-unit jump from the initial zero
        let mut samples = vec![200.0f32; 10];
        run(&mut m, &mut host, &mut samples);
        assert!(host.events().is_empty());
    }

    #[test]
    fn test_pulse_lasts_pulse_length() {
        let mut m = module(100.0);
        let mut host = FixedRateHost::new(1000.0, 1);
        let mut samples = vec![0.0f32; 100];
        samples[20..].fill(200.0);
        run(&mut m, &mut host, &mut samples);

        let events = host.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].asserted);
        assert_eq!(events[0].sample_offset, 20);
        assert_eq!(events[0].ttl_word, 0b100);
        assert!(!events[1].asserted);
        assert_eq!(events[1].sample_offset, 25);
        assert_eq!(events[1].ttl_word, 0);
    }

    #[test]
    fn test_artifact_rejected() {
        let mut m = module(100.0);
        let mut host = FixedRateHost::new(1000.0, 1);
        let mut samples = vec![0.0f32; 100];
        // 600 > 5 x threshold
        samples[50..].fill(600.0);
        run(&mut m, &mut host, &mut samples);
        assert!(host.events().is_empty());
    }

    #[test]
    fn test_no_retrigger_while_window_open() {
        let mut m = module(100.0);
        let mut host = FixedRateHost::new(1000.0, 1);
        let mut samples = vec![0.0f32; 200];
        // Two steps 20 samples apart, second inside the 40-sample window
        samples[10..].fill(200.0);
        samples[30..].fill(0.0);
        run(&mut m, &mut host, &mut samples);

        let asserts = host.events().iter().filter(|e| e.asserted).count();
        assert_eq!(asserts, 1);
        assert_eq!(m.shared().row_summaries()[0].count, 1);
    }

    #[test]
    fn test_window_spans_buffers() {
        let mut m = module(100.0);
        let mut host = FixedRateHost::new(1000.0, 1);

        let mut first = vec![0.0f32; 32];
        first[30..].fill(200.0);
        run(&mut m, &mut host, &mut first);
        assert!(m.is_capturing());
        assert_eq!(m.capture().position(), Some(2));

        let mut second = vec![200.0f32; 64];
        run(&mut m, &mut host, &mut second);
        assert!(!m.is_capturing());

        let (features, count) = m.shared().last_window().unwrap();
        assert_eq!(count, 1);
        assert_eq!(features.y_min, 200.0);
        assert_eq!(m.capture().timestamps()[0], 30);
    }

    #[test]
    fn test_gate_opens_window_without_threshold() {
        let mut m = module(100.0);
        m.shared().settings().set_gate_channel(Some(1));
        let mut host = FixedRateHost::new(1000.0, 1);
        m.sync(&mut host);

        m.handle_ttl(TtlEvent::on(1));
        assert!(m.is_gate_armed());

        let mut samples = vec![1.0f32; 64];
        let ts = host.timestamp(0);
        m.prepare(1000.0, &EngineConfig::default());
        m.process(&mut samples, ts, &mut host);

        assert!(!m.is_gate_armed());
        assert!(host.events().is_empty(), "gated windows emit no pulse");
        assert_eq!(m.shared().row_summaries()[0].count, 1);
    }

    #[test]
    fn test_gate_off_disarms() {
        let mut m = module(100.0);
        m.shared().settings().set_gate_channel(Some(1));
        m.sync(&mut FixedRateHost::new(1000.0, 1));
        m.handle_ttl(TtlEvent::on(1));
        m.handle_ttl(TtlEvent::off(1));
        assert!(!m.is_gate_armed());

        m.handle_ttl(TtlEvent::on(4));
        assert!(!m.is_gate_armed(), "other lines are ignored");
    }

    #[test]
    fn test_difference_written_back() {
        let mut m = module(100.0);
        m.shared().settings().set_apply_difference(true);
        let mut host = FixedRateHost::new(1000.0, 1);
        let mut samples = vec![1.0f32, 3.0, 6.0, 4.0];
        run(&mut m, &mut host, &mut samples);
        assert_eq!(samples, vec![1.0, 2.0, 3.0, -2.0]);
    }

    #[test]
    fn test_reset_mid_window_aborts_capture() {
        let mut m = module(100.0);
        let mut host = FixedRateHost::new(1000.0, 1);

        let mut first = vec![0.0f32; 16];
        first[13..].fill(200.0);
        run(&mut m, &mut host, &mut first);
        assert!(m.is_capturing());
        assert!(m.pulse().is_active());

        m.shared().reset_aggregates();
        host.take_events();

        let mut second = vec![200.0f32; 64];
        run(&mut m, &mut host, &mut second);

        assert!(!m.is_capturing());
        assert_eq!(m.capture().average().sweeps(), 0);
        assert!(m.shared().last_window().is_none());
        assert_eq!(m.shared().row_summaries()[0].count, 0);

        // The interrupted pulse is released at the start of the next buffer
        let events = host.events();
        assert_eq!(events.len(), 1);
        assert!(!events[0].asserted);
        assert_eq!(events[0].sample_offset, 0);
    }

    /// Two complete windows: one flat at 200, one flat at 0
    fn two_windows(m: &mut DetectorModule, host: &mut FixedRateHost) {
        run(m, host, &mut vec![0.0f32; 10]);
        run(m, host, &mut vec![200.0f32; 60]);
        run(m, host, &mut vec![0.0f32; 60]);
        assert_eq!(m.capture().average().sweeps(), 2);
    }

    #[test]
    fn test_rebind_mid_window_keeps_average_of_complete_windows() {
        let mut m = module(100.0);
        let mut host = FixedRateHost::new(1000.0, 2);
        two_windows(&mut m, &mut host);

        run(&mut m, &mut host, &mut vec![400.0f32; 10]);
        assert!(m.is_capturing());

        m.shared().settings().set_input_channel(Some(1));
        run(&mut m, &mut host, &mut vec![0.0f32; 10]);
        assert!(!m.is_capturing());
        run(&mut m, &mut host, &mut vec![200.0f32; 60]);

        let avg = m.capture().average();
        assert_eq!(avg.sweeps(), 3);
        for &value in avg.values() {
            assert!((value - 400.0 / 3.0).abs() < 1e-9, "got {value}");
        }
        assert_eq!(m.shared().row_summaries()[0].count, 3);
    }

    #[test]
    fn test_split_mid_window_restarts_average() {
        let mut m = module(100.0);
        let mut host = FixedRateHost::new(1000.0, 1);
        two_windows(&mut m, &mut host);

        run(&mut m, &mut host, &mut vec![400.0f32; 5]);
        assert!(m.is_capturing());
        assert_eq!(m.shared().split_row(), 1);
        run(&mut m, &mut host, &mut vec![400.0f32; 60]);

        let rows = m.shared().row_summaries();
        assert_eq!(rows[0].count, 2);
        assert_eq!(rows[1].count, 1);
        assert_eq!(rows[1].y_min, 400.0);
        assert_eq!(rows[1].y_max, 400.0);
        assert_eq!(m.capture().average().sweeps(), 1);
    }

    #[test]
    fn test_fold_refused_across_split() {
        let shared = SharedModule::new(ModuleId(0), 100.0);
        let features = WindowFeatures {
            y_min: 1.0,
            y_max: 2.0,
            x_min: 0,
            x_max: 0,
            peak_to_peak: 1.0,
            latency_ms: 0.0,
            slope: 0.0,
        };
        let seen_split = shared.split_epoch();
        shared.split_row();

        let outcome = shared.fold(&features, shared.reset_epoch(), seen_split);
        assert_eq!(outcome, FoldOutcome::Split(shared.split_epoch()));
        assert_eq!(shared.row_summaries()[1].count, 0);
        assert_eq!(
            shared.fold(&features, shared.reset_epoch(), shared.split_epoch()),
            FoldOutcome::Folded
        );
        assert_eq!(shared.row_summaries()[1].count, 1);
    }

    #[test]
    fn test_invalid_sample_rate_rejected_once() {
        let mut m = module(100.0);
        let config = EngineConfig::default();
        assert_eq!(m.prepare(0.0, &config), None);
        assert_eq!(m.rejected_rate, Some(0.0));
        assert_eq!(m.prepare(0.0, &config), None);
        assert!(m.timing().is_none());

        assert_eq!(m.prepare(1000.0, &config), Some(0));
        assert_eq!(m.rejected_rate, None);
        assert_eq!(m.capture().len(), 40);
    }
}

//! Stimulus detection engine
//!
//! Owns the detector modules and drives them over each host callback:
//!
//! 1. Channel-count drift is checked and stale input bindings are dropped.
//! 2. Every module takes its settings snapshot and reconciles resets.
//! 3. Gate TTL events of the callback are dispatched to every module.
//! 4. Modules process their input channel in ascending id order.
//!
//! Step 4 ordering is observable: a module in difference mode rewrites the
//! shared channel buffer, and modules with a higher id on the same channel
//! see the differenced samples.
//!
//! Control operations go through [`ControlHandle`], which can be cloned and
//! moved to another thread while the engine itself runs on the real-time
//! thread.

use crate::config::{EngineConfig, ModuleConfig};
use crate::detect::module::{DetectorModule, ModuleId, SettingsSnapshot, SharedModule};
use crate::error::ControlError;
use crate::host::{Host, SampleBuffer, TtlEvent};
use crate::stats::rows::RowSummary;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Features of the last completed window with the active row's count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    pub y_min: f64,
    pub y_max: f64,
    pub peak_to_peak: f64,
    pub latency_ms: f64,
    pub slope: f64,
    pub count: u64,
}

/// Module listing entry for a control surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub settings: SettingsSnapshot,
    /// Set when a channel-count change dropped the input binding
    pub rebind_required: bool,
    pub row_count: usize,
}

/// State reachable from every control handle
#[derive(Debug)]
struct Registry {
    modules: Mutex<BTreeMap<ModuleId, Arc<SharedModule>>>,
    num_inputs: AtomicUsize,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ModuleId, Arc<SharedModule>>> {
        self.modules
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn validate_threshold(threshold: f32) -> Result<f32, ControlError> {
    // NaN fails both comparisons
    if threshold > crate::MIN_THRESHOLD && threshold < crate::MAX_THRESHOLD {
        Ok(threshold)
    } else {
        Err(ControlError::ThresholdOutOfRange(threshold))
    }
}

fn validate_line(
    channel: Option<usize>,
    err: impl FnOnce(usize) -> ControlError,
) -> Result<Option<usize>, ControlError> {
    match channel {
        Some(ch) if ch >= crate::TTL_LINES => Err(err(ch)),
        other => Ok(other),
    }
}

/// Thread-safe handle for the control path
///
/// Every setter validates before writing; on `Err` the module is unchanged.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    registry: Arc<Registry>,
}

impl ControlHandle {
    fn module(&self, id: ModuleId) -> Result<Arc<SharedModule>, ControlError> {
        self.registry
            .lock()
            .get(&id)
            .cloned()
            .ok_or(ControlError::UnknownModule(id))
    }

    /// Number of input channels the engine last saw
    pub fn num_input_channels(&self) -> usize {
        self.registry.num_inputs.load(Ordering::Acquire)
    }

    fn validate_input(&self, channel: Option<usize>) -> Result<Option<usize>, ControlError> {
        let available = self.num_input_channels();
        match channel {
            Some(ch) if ch >= available => Err(ControlError::InputChannelOutOfRange {
                channel: ch,
                available,
            }),
            other => Ok(other),
        }
    }

    /// Bind (or unbind with `None`) the input channel
    pub fn set_input_channel(
        &self,
        id: ModuleId,
        channel: Option<usize>,
    ) -> Result<(), ControlError> {
        let module = self.module(id)?;
        let channel = self.validate_input(channel).inspect_err(|e| {
            tracing::warn!(module = %id, "Rejected input channel: {}", e);
        })?;
        module.settings().set_input_channel(channel);
        tracing::info!(module = %id, ?channel, "Input channel set");
        Ok(())
    }

    /// Set the TTL line that receives output pulses
    pub fn set_output_channel(
        &self,
        id: ModuleId,
        channel: Option<usize>,
    ) -> Result<(), ControlError> {
        let module = self.module(id)?;
        let channel = validate_line(channel, |channel| ControlError::OutputChannelOutOfRange {
            channel,
            lines: crate::TTL_LINES,
        })
        .inspect_err(|e| tracing::warn!(module = %id, "Rejected output line: {}", e))?;
        module.settings().set_output_channel(channel);
        tracing::info!(module = %id, ?channel, "Output line set");
        Ok(())
    }

    /// Set the gate TTL line; `Some` switches the module to gated mode
    pub fn set_gate_channel(&self, id: ModuleId, channel: Option<usize>) -> Result<(), ControlError> {
        let module = self.module(id)?;
        let channel = validate_line(channel, |channel| ControlError::GateChannelOutOfRange {
            channel,
            lines: crate::TTL_LINES,
        })
        .inspect_err(|e| tracing::warn!(module = %id, "Rejected gate line: {}", e))?;
        module.settings().set_gate_channel(channel);
        tracing::info!(module = %id, ?channel, "Gate line set");
        Ok(())
    }

    /// Set the detection threshold; must lie strictly inside the allowed range
    pub fn set_threshold(&self, id: ModuleId, threshold: f32) -> Result<(), ControlError> {
        let module = self.module(id)?;
        let threshold = validate_threshold(threshold).inspect_err(|e| {
            tracing::warn!(
                module = %id,
                previous = module.settings().threshold(),
                "Rejected threshold: {}",
                e
            );
        })?;
        module.settings().set_threshold(threshold);
        tracing::info!(module = %id, threshold, "Threshold set");
        Ok(())
    }

    /// Enable or disable in-place first-difference rewriting
    pub fn set_apply_difference(&self, id: ModuleId, enabled: bool) -> Result<(), ControlError> {
        self.module(id)?.settings().set_apply_difference(enabled);
        tracing::info!(module = %id, enabled, "Difference mode set");
        Ok(())
    }

    /// Start a new aggregation row; returns the new active row index
    pub fn split_row(&self, id: ModuleId) -> Result<usize, ControlError> {
        let row = self.module(id)?.split_row();
        tracing::debug!(module = %id, row, "row_split");
        Ok(row)
    }

    /// Discard every row, the running average and any window in progress
    pub fn reset_aggregates(&self, id: ModuleId) -> Result<(), ControlError> {
        self.module(id)?.reset_aggregates();
        tracing::debug!(module = %id, "aggregates_reset");
        Ok(())
    }

    /// Features of the last folded window, `None` if nothing was folded
    /// since the last reset
    pub fn last_window_features(
        &self,
        id: ModuleId,
    ) -> Result<Option<WindowSummary>, ControlError> {
        let summary = self
            .module(id)?
            .last_window()
            .map(|(features, count)| WindowSummary {
                y_min: features.y_min,
                y_max: features.y_max,
                peak_to_peak: features.peak_to_peak,
                latency_ms: features.latency_ms,
                slope: features.slope,
                count,
            });
        Ok(summary)
    }

    /// Every row up to and including the active one
    pub fn row_matrix(&self, id: ModuleId) -> Result<Vec<RowSummary>, ControlError> {
        Ok(self.module(id)?.row_summaries())
    }

    /// Current settings as a persistable record
    pub fn module_config(&self, id: ModuleId) -> Result<ModuleConfig, ControlError> {
        let s = self.module(id)?.settings().snapshot();
        Ok(ModuleConfig {
            input_channel: s.input_channel,
            output_channel: s.output_channel,
            gate_channel: s.gate_channel,
            threshold: s.threshold,
            apply_difference: s.apply_difference,
        })
    }

    fn validate_config(
        &self,
        config: &ModuleConfig,
    ) -> Result<(f32, Option<usize>, Option<usize>, Option<usize>), ControlError> {
        let threshold = validate_threshold(config.threshold)?;
        let input = self.validate_input(config.input_channel)?;
        let output = validate_line(config.output_channel, |channel| {
            ControlError::OutputChannelOutOfRange {
                channel,
                lines: crate::TTL_LINES,
            }
        })?;
        let gate = validate_line(config.gate_channel, |channel| {
            ControlError::GateChannelOutOfRange {
                channel,
                lines: crate::TTL_LINES,
            }
        })?;
        Ok((threshold, input, output, gate))
    }

    /// Apply a persisted record; every field is validated before any is written
    pub fn apply_module_config(
        &self,
        id: ModuleId,
        config: &ModuleConfig,
    ) -> Result<(), ControlError> {
        let module = self.module(id)?;
        let (threshold, input, output, gate) = self
            .validate_config(config)
            .inspect_err(|e| tracing::warn!(module = %id, "Rejected module config: {}", e))?;

        let settings = module.settings();
        settings.set_threshold(threshold);
        settings.set_input_channel(input);
        settings.set_output_channel(output);
        settings.set_gate_channel(gate);
        settings.set_apply_difference(config.apply_difference);
        tracing::info!(module = %id, "Module config applied");
        Ok(())
    }

    /// Snapshot of every module in ascending id order
    pub fn modules(&self) -> Vec<ModuleInfo> {
        let modules: Vec<Arc<SharedModule>> = self.registry.lock().values().cloned().collect();
        modules
            .iter()
            .map(|m| ModuleInfo {
                id: m.id(),
                settings: m.settings().snapshot(),
                rebind_required: m.settings().rebind_required(),
                row_count: m.row_count(),
            })
            .collect()
    }
}

/// Multi-module stimulus detection engine
#[derive(Debug)]
pub struct StimEngine {
    config: EngineConfig,
    /// Real-time halves, kept sorted by id
    modules: Vec<DetectorModule>,
    next_id: usize,
    control: ControlHandle,
}

impl StimEngine {
    /// Create an engine for a host with `num_input_channels` inputs
    pub fn new(config: EngineConfig, num_input_channels: usize) -> Self {
        tracing::info!(
            num_input_channels,
            window_ms = config.window_ms,
            pulse_ms = config.pulse_ms,
            max_modules = config.max_modules,
            "Stimulus engine created"
        );
        Self {
            modules: Vec::with_capacity(config.max_modules),
            config,
            next_id: 0,
            control: ControlHandle {
                registry: Arc::new(Registry {
                    modules: Mutex::new(BTreeMap::new()),
                    num_inputs: AtomicUsize::new(num_input_channels),
                }),
            },
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clone a handle for the control path
    pub fn control_handle(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Real-time half of a module, for inspection
    pub fn module(&self, id: ModuleId) -> Option<&DetectorModule> {
        self.modules.iter().find(|m| m.id() == id)
    }

    /// Add a detector with default settings and no channel bindings
    pub fn add_module(&mut self) -> Result<ModuleId, ControlError> {
        if self.modules.len() >= self.config.max_modules {
            tracing::warn!(max = self.config.max_modules, "Module limit reached");
            return Err(ControlError::TooManyModules(self.config.max_modules));
        }

        let id = ModuleId(self.next_id);
        self.next_id += 1;

        let shared = Arc::new(SharedModule::new(id, self.config.default_threshold));
        self.control
            .registry
            .lock()
            .insert(id, Arc::clone(&shared));
        // Ids only grow, so pushing keeps the list sorted
        self.modules.push(DetectorModule::new(shared));

        tracing::info!(module = %id, threshold = self.config.default_threshold, "Module added");
        Ok(id)
    }

    /// Remove a detector and all of its aggregated results
    pub fn remove_module(&mut self, id: ModuleId) -> Result<(), ControlError> {
        let index = self
            .modules
            .iter()
            .position(|m| m.id() == id)
            .ok_or(ControlError::UnknownModule(id))?;
        self.modules.remove(index);
        self.control.registry.lock().remove(&id);
        tracing::info!(module = %id, "Module removed");
        Ok(())
    }

    pub fn set_input_channel(
        &self,
        id: ModuleId,
        channel: Option<usize>,
    ) -> Result<(), ControlError> {
        self.control.set_input_channel(id, channel)
    }

    pub fn set_output_channel(
        &self,
        id: ModuleId,
        channel: Option<usize>,
    ) -> Result<(), ControlError> {
        self.control.set_output_channel(id, channel)
    }

    pub fn set_gate_channel(&self, id: ModuleId, channel: Option<usize>) -> Result<(), ControlError> {
        self.control.set_gate_channel(id, channel)
    }

    pub fn set_threshold(&self, id: ModuleId, threshold: f32) -> Result<(), ControlError> {
        self.control.set_threshold(id, threshold)
    }

    pub fn set_apply_difference(&self, id: ModuleId, enabled: bool) -> Result<(), ControlError> {
        self.control.set_apply_difference(id, enabled)
    }

    pub fn split_row(&self, id: ModuleId) -> Result<usize, ControlError> {
        self.control.split_row(id)
    }

    /// Reset the aggregates and put the module back to idle immediately
    ///
    /// An output pulse cut short by the reset is deasserted at the start of
    /// the next buffer.
    pub fn reset_aggregates(&mut self, id: ModuleId) -> Result<(), ControlError> {
        self.control.reset_aggregates(id)?;
        if let Some(module) = self.modules.iter_mut().find(|m| m.id() == id) {
            module.apply_reset();
        }
        Ok(())
    }

    pub fn last_window_features(
        &self,
        id: ModuleId,
    ) -> Result<Option<WindowSummary>, ControlError> {
        self.control.last_window_features(id)
    }

    pub fn row_matrix(&self, id: ModuleId) -> Result<Vec<RowSummary>, ControlError> {
        self.control.row_matrix(id)
    }

    pub fn module_config(&self, id: ModuleId) -> Result<ModuleConfig, ControlError> {
        self.control.module_config(id)
    }

    pub fn apply_module_config(
        &self,
        id: ModuleId,
        config: &ModuleConfig,
    ) -> Result<(), ControlError> {
        self.control.apply_module_config(id, config)
    }

    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.control.modules()
    }

    /// Record the host's current input channel count
    ///
    /// When it differs from the last known count, every bound input is
    /// dropped and its module is flagged for rebinding. Returns true if the
    /// count changed.
    pub fn update_channel_count(&mut self, count: usize) -> bool {
        let previous = self.control.registry.num_inputs.swap(count, Ordering::AcqRel);
        if previous == count {
            return false;
        }

        tracing::warn!(previous, count, "Input channel count changed");
        for module in &self.modules {
            let settings = module.shared().settings();
            if settings.input_channel().is_some() {
                settings.invalidate_input();
                tracing::warn!(module = %module.id(), "Input binding dropped, rebind required");
            }
        }
        true
    }

    /// Process one host callback
    ///
    /// `events` are the gate transitions delivered with this buffer; they
    /// are applied before any sample is processed.
    pub fn process<H: Host + ?Sized>(
        &mut self,
        buffer: &mut SampleBuffer,
        events: &[TtlEvent],
        host: &mut H,
    ) {
        self.update_channel_count(host.num_input_channels());

        for module in &mut self.modules {
            module.sync(host);
        }

        for &event in events {
            for module in &mut self.modules {
                module.handle_ttl(event);
            }
        }

        for module in &mut self.modules {
            let Some(input) = module.input_channel() else {
                continue;
            };
            let sample_rate = host.sample_rate(input);
            if module.prepare(sample_rate, &self.config).is_none() {
                continue;
            }
            let timestamp = host.timestamp(input);
            if let Some(samples) = buffer.channel_mut(input) {
                module.process(samples, timestamp, host);
            }
        }
    }
}

//! Real-time stream front-end
//!
//! Wraps a [`StimEngine`] for use inside an acquisition callback:
//!
//! - Gate TTL events arrive through a lock-free SPSC ring. The acquisition
//!   side pushes, the callback drains everything queued before the buffer.
//! - Digital output events leave through a bounded crossbeam channel with
//!   `try_send`; events that do not fit are counted, never waited on.
//! - The sample clock is kept by the stream and advanced per buffer.
//!
//! Nothing here allocates after construction.

use crate::engine::{ControlHandle, StimEngine};
use crate::host::{DigitalEvent, Host, SampleBuffer, TtlEvent};
use crossbeam_channel::{Receiver, Sender};
use ringbuf::traits::{Consumer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Gate events buffered between two callbacks
pub const GATE_QUEUE_SIZE: usize = 1024;

/// Output events buffered for the consumer
pub const EVENT_QUEUE_SIZE: usize = 4096;

/// Host adapter used for a single callback
struct CallbackHost<'a> {
    sample_rate: f64,
    num_channels: usize,
    timestamp: i64,
    events: &'a Sender<DigitalEvent>,
    dropped: &'a AtomicU64,
}

impl Host for CallbackHost<'_> {
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
        if self.events.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Endpoints handed to the acquisition and consumer sides
pub struct StreamEndpoints {
    /// Push gate transitions here before the buffer they belong to
    pub gate_tx: HeapProd<TtlEvent>,
    /// Digital output events in emission order
    pub events_rx: Receiver<DigitalEvent>,
    /// Control path for the wrapped engine
    pub control: ControlHandle,
}

/// Engine bound to a fixed-rate sample clock
pub struct RealtimeStream {
    engine: StimEngine,
    sample_rate: f64,
    num_channels: usize,
    timestamp: i64,
    gate_rx: HeapCons<TtlEvent>,
    gate_scratch: Vec<TtlEvent>,
    events_tx: Sender<DigitalEvent>,
    dropped: Arc<AtomicU64>,
    buffers: u64,
}

impl RealtimeStream {
    /// Wrap `engine` for a source running at `sample_rate` with `num_channels` inputs
    pub fn new(engine: StimEngine, sample_rate: f64, num_channels: usize) -> (Self, StreamEndpoints) {
        Self::with_capacity(engine, sample_rate, num_channels, GATE_QUEUE_SIZE, EVENT_QUEUE_SIZE)
    }

    pub fn with_capacity(
        engine: StimEngine,
        sample_rate: f64,
        num_channels: usize,
        gate_capacity: usize,
        event_capacity: usize,
    ) -> (Self, StreamEndpoints) {
        let (gate_tx, gate_rx) = HeapRb::<TtlEvent>::new(gate_capacity).split();
        let (events_tx, events_rx) = crossbeam_channel::bounded(event_capacity);
        let control = engine.control_handle();

        tracing::info!(
            sample_rate,
            num_channels,
            gate_capacity,
            event_capacity,
            "Realtime stream created"
        );

        let stream = Self {
            engine,
            sample_rate,
            num_channels,
            timestamp: 0,
            gate_rx,
            gate_scratch: Vec::with_capacity(gate_capacity),
            events_tx,
            dropped: Arc::new(AtomicU64::new(0)),
            buffers: 0,
        };
        let endpoints = StreamEndpoints {
            gate_tx,
            events_rx,
            control,
        };
        (stream, endpoints)
    }

    pub fn engine(&self) -> &StimEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut StimEngine {
        &mut self.engine
    }

    /// Timestamp of the next buffer's first sample
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Change the source sample rate; windows are resized on the next buffer
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        tracing::info!("Sample rate changed: {} -> {} Hz", self.sample_rate, sample_rate);
        self.sample_rate = sample_rate;
    }

    /// Change the reported input channel count
    pub fn set_num_channels(&mut self, num_channels: usize) {
        self.num_channels = num_channels;
    }

    /// Output events dropped because the consumer fell behind
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared counter behind [`RealtimeStream::dropped_events`]
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    /// Number of buffers processed
    pub fn buffers_processed(&self) -> u64 {
        self.buffers
    }

    /// Process one acquisition buffer
    pub fn process_buffer(&mut self, buffer: &mut SampleBuffer) {
        self.gate_scratch.clear();
        // Bounded by the ring capacity, which the scratch was sized to
        self.gate_scratch.extend(self.gate_rx.pop_iter());

        let mut host = CallbackHost {
            sample_rate: self.sample_rate,
            num_channels: self.num_channels,
            timestamp: self.timestamp,
            events: &self.events_tx,
            dropped: &self.dropped,
        };
        self.engine.process(buffer, &self.gate_scratch, &mut host);

        let frames = (0..buffer.num_channels())
            .map(|ch| buffer.num_samples(ch))
            .max()
            .unwrap_or(0);
        self.timestamp += frames as i64;
        self.buffers += 1;
    }
}

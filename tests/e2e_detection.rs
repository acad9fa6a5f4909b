//! E2E tests for self-triggered stimulus detection
//!
//! Drives a full engine through the public API and checks output pulse
//! timing, trigger eligibility and the features of completed windows.

use approx::assert_relative_eq;
use stimdetector::host::FixedRateHost;
use stimdetector::signal::EvokedSignal;
use stimdetector::{EngineConfig, ModuleId, SampleBuffer, StimEngine};

const SAMPLE_RATE: f64 = 1000.0;

/// Engine with one self-triggered module on input 0, output line 0
fn single_module(threshold: f32) -> (StimEngine, ModuleId) {
    let mut engine = StimEngine::new(EngineConfig::default(), 1);
    let id = engine.add_module().unwrap();
    engine.set_input_channel(id, Some(0)).unwrap();
    engine.set_output_channel(id, Some(0)).unwrap();
    engine.set_threshold(id, threshold).unwrap();
    (engine, id)
}

/// Feed `signal` in buffers of `chunk` samples
fn feed(engine: &mut StimEngine, host: &mut FixedRateHost, signal: &[f32], chunk: usize) {
    for part in signal.chunks(chunk) {
        let mut buffer = SampleBuffer::from_channels(vec![part.to_vec()]);
        engine.process(&mut buffer, &[], host);
        host.advance(part.len());
    }
}

/// Test that a signal without threshold crossings never emits or folds
#[test]
fn test_no_crossings_no_events() {
    let (mut engine, id) = single_module(100.0);
    let mut host = FixedRateHost::new(SAMPLE_RATE, 1);

    // Noisy baseline with small responses, every step well under threshold
    let mut source = EvokedSignal::new(SAMPLE_RATE)
        .with_artifact_amplitude(0.0)
        .with_response_amplitude(20.0);
    let mut signal = vec![0.0f32; 5000];
    source.fill_buffer(&mut signal);
    feed(&mut engine, &mut host, &signal, 64);

    assert!(host.events().is_empty());
    let rows = engine.row_matrix(id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].count, 0);
    assert!(engine.last_window_features(id).unwrap().is_none());
}

/// Test the reference step scenario: flat for 100 samples, then a step to 200
#[test]
fn test_step_scenario() {
    let (mut engine, id) = single_module(100.0);
    let mut host = FixedRateHost::new(SAMPLE_RATE, 1);

    let mut signal = vec![0.0f32; 300];
    signal[100..].fill(200.0);
    feed(&mut engine, &mut host, &signal, 300);

    let events = host.events();
    assert_eq!(events.len(), 2, "exactly one assert and one deassert");
    assert!(events[0].asserted);
    assert_eq!(events[0].timestamp, 100);
    assert_eq!(events[0].ttl_word, 1);
    assert!(!events[1].asserted);
    assert_eq!(events[1].timestamp, 105);
    assert_eq!(events[1].ttl_word, 0);

    let capture = engine.module(id).unwrap().capture();
    assert_eq!(capture.len(), 40);
    assert_eq!(capture.timestamps()[0], 100);
    assert_eq!(capture.timestamps()[39], 139);
    assert!(capture.raw().iter().all(|&s| s == 200.0));

    let last = engine.last_window_features(id).unwrap().unwrap();
    assert_eq!(last.count, 1);
    assert_eq!(last.y_min, 200.0);
    assert_eq!(last.y_max, 200.0);
    assert_eq!(engine.row_matrix(id).unwrap()[0].count, 1);
}

/// Test that the step scenario produces identical results for any buffer size
#[test]
fn test_step_scenario_independent_of_buffer_size() {
    let mut signal = vec![0.0f32; 300];
    signal[100..].fill(200.0);

    for chunk in [1usize, 7, 16, 64, 101, 300] {
        let (mut engine, id) = single_module(100.0);
        let mut host = FixedRateHost::new(SAMPLE_RATE, 1);
        feed(&mut engine, &mut host, &signal, chunk);

        let stamps: Vec<(i64, bool)> = host
            .events()
            .iter()
            .map(|e| (e.timestamp, e.asserted))
            .collect();
        assert_eq!(stamps, vec![(100, true), (105, false)], "chunk {}", chunk);
        assert_eq!(engine.row_matrix(id).unwrap()[0].count, 1, "chunk {}", chunk);
    }
}

/// Test that differences at exactly threshold or 5x threshold do not trigger
#[test]
fn test_threshold_bounds_are_exclusive() {
    for step in [100.0f32, 500.0] {
        let (mut engine, _) = single_module(100.0);
        let mut host = FixedRateHost::new(SAMPLE_RATE, 1);
        let mut signal = vec![0.0f32; 100];
        signal[50..].fill(step);
        feed(&mut engine, &mut host, &signal, 100);
        assert!(host.events().is_empty(), "step {} must not trigger", step);
    }

    let (mut engine, _) = single_module(100.0);
    let mut host = FixedRateHost::new(SAMPLE_RATE, 1);
    let mut signal = vec![0.0f32; 100];
    signal[50..].fill(499.0);
    feed(&mut engine, &mut host, &signal, 100);
    assert_eq!(host.events().len(), 2);
}

/// Test that a qualifying step right after a rejected artefact does not trigger
#[test]
fn test_difference_must_rise() {
    let (mut engine, _) = single_module(100.0);
    let mut host = FixedRateHost::new(SAMPLE_RATE, 1);

    // 0 -> 600 is an artefact; 600 -> 400 is in range but smaller than 600
    let mut signal = vec![0.0f32; 100];
    signal[50] = 600.0;
    signal[51..].fill(400.0);
    feed(&mut engine, &mut host, &signal, 100);

    assert!(host.events().is_empty());
}

/// Test that the very first sample seen on a channel cannot trigger
#[test]
fn test_first_sample_never_triggers() {
    let (mut engine, _) = single_module(100.0);
    let mut host = FixedRateHost::new(SAMPLE_RATE, 1);
    feed(&mut engine, &mut host, &[200.0; 80], 80);
    assert!(host.events().is_empty());
}

/// Test that a second step inside an open window is ignored
#[test]
fn test_no_retrigger_inside_window() {
    let (mut engine, id) = single_module(100.0);
    let mut host = FixedRateHost::new(SAMPLE_RATE, 1);

    let mut signal = vec![0.0f32; 200];
    signal[20..].fill(200.0);
    signal[35..].fill(0.0);
    // Outside the first window (20..60), so this one counts
    signal[100..].fill(200.0);
    feed(&mut engine, &mut host, &signal, 32);

    let asserts: Vec<i64> = host
        .events()
        .iter()
        .filter(|e| e.asserted)
        .map(|e| e.timestamp)
        .collect();
    assert_eq!(asserts, vec![20, 100]);
    assert_eq!(engine.row_matrix(id).unwrap()[0].count, 2);
}

/// Test that window and pulse lengths follow the channel's sample rate
#[test]
fn test_sample_rate_sets_window_length() {
    let (mut engine, id) = single_module(100.0);
    let mut host = FixedRateHost::new(2000.0, 1);

    let mut signal = vec![0.0f32; 400];
    signal[100..].fill(200.0);
    feed(&mut engine, &mut host, &signal, 400);

    let timing = *engine.module(id).unwrap().timing().unwrap();
    assert_eq!(timing.window_length, 80);
    assert_eq!(timing.pulse_length, 10);
    assert_eq!(timing.smoothing_radius, 10);

    let events = host.events();
    assert_eq!(events[1].timestamp - events[0].timestamp, 10);
}

/// Test that an unset output line still captures and folds windows
#[test]
fn test_unset_output_still_folds() {
    let (mut engine, id) = single_module(100.0);
    engine.set_output_channel(id, None).unwrap();
    let mut host = FixedRateHost::new(SAMPLE_RATE, 1);

    let mut signal = vec![0.0f32; 200];
    signal[50..].fill(200.0);
    feed(&mut engine, &mut host, &signal, 50);

    assert!(host.events().is_empty());
    assert_eq!(engine.row_matrix(id).unwrap()[0].count, 1);
}

/// Test features extracted from averaged synthetic evoked responses
#[test]
fn test_evoked_response_features() {
    let (mut engine, id) = single_module(150.0);
    let mut host = FixedRateHost::new(SAMPLE_RATE, 1);
    let mut source = EvokedSignal::new(SAMPLE_RATE).with_noise(0.0);
    let period = source.period();

    // The first cycle triggers late (its artefact onset is the channel's
    // first sample), so discard it before measuring
    let mut warmup = vec![0.0f32; period];
    source.fill_buffer(&mut warmup);
    feed(&mut engine, &mut host, &warmup, 64);
    engine.reset_aggregates(id).unwrap();

    let mut signal = vec![0.0f32; period * 10];
    source.fill_buffer(&mut signal);
    feed(&mut engine, &mut host, &signal, 64);

    let last = engine.last_window_features(id).unwrap().unwrap();
    assert_eq!(last.count, 10);
    assert!(last.y_min < -50.0, "trough {}", last.y_min);
    assert!(last.y_max > 50.0, "peak {}", last.y_max);
    assert!(last.peak_to_peak > 100.0);
    // Trough sits around 21 samples after the stimulus, plus the pulse span
    assert!(
        (24.0..=28.0).contains(&last.latency_ms),
        "latency {}",
        last.latency_ms
    );
    assert!(last.slope > 0.0);

    let row = &engine.row_matrix(id).unwrap()[0];
    assert_eq!(row.count, 10);
    assert_relative_eq!(row.y_min, last.y_min, epsilon = 1e-9);
    assert_relative_eq!(last.peak_to_peak, last.y_max - last.y_min, epsilon = 1e-9);
}

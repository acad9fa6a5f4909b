//! Stimdetector - simulated acquisition demo
//!
//! Runs the detection engine against a synthetic evoked-response source on a
//! dedicated real-time thread and prints the row matrix periodically.

use anyhow::{bail, Result};
use crossbeam_channel::Receiver;
use ringbuf::traits::Producer;
use stimdetector::config::EngineConfig;
use stimdetector::signal::EvokedSignal;
use stimdetector::stream::{RealtimeStream, StreamEndpoints};
use stimdetector::{ControlHandle, DigitalEvent, SampleBuffer, StimEngine, TtlEvent};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Samples per simulated acquisition callback
const BUFFER_SIZE: usize = 512;

/// Input channels of the simulated source
const NUM_CHANNELS: usize = 2;

/// Gate TTL line driven by the simulated stimulator
const GATE_LINE: usize = 1;

/// Rows are split this often so the matrix grows while the demo runs
const SPLIT_INTERVAL: Duration = Duration::from_secs(10);

struct Options {
    config_path: Option<PathBuf>,
    sample_rate: f64,
    seconds: Option<u64>,
    json: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stimdetector=info".parse().unwrap())
                .add_directive("stimdetector_core=info".parse().unwrap()),
        )
        .init();

    let Some(options) = parse_args()? else {
        return Ok(());
    };

    println!(
        "Stimdetector v{} (built {})",
        stimdetector::VERSION,
        stimdetector::BUILD_DATE
    );
    println!();

    let config = match &options.config_path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::default(),
    };

    run(config, &options)
}

fn parse_args() -> Result<Option<Options>> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        config_path: None,
        sample_rate: 30000.0,
        seconds: None,
        json: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("stimdetector {}", stimdetector::VERSION);
                return Ok(None);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            "--json" => options.json = true,
            "--config" | "-c" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--config requires a path");
                };
                options.config_path = Some(PathBuf::from(value));
                i += 1;
            }
            "--sample-rate" | "-r" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--sample-rate requires a value");
                };
                match value.parse::<f64>() {
                    Ok(rate) if rate > 0.0 => options.sample_rate = rate,
                    _ => bail!("Invalid sample rate: {}", value),
                }
                i += 1;
            }
            "--seconds" | "-s" => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--seconds requires a value");
                };
                match value.parse::<u64>() {
                    Ok(secs) => options.seconds = Some(secs),
                    Err(_) => bail!("Invalid duration: {}", value),
                }
                i += 1;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                return Ok(None);
            }
        }
        i += 1;
    }

    Ok(Some(options))
}

fn print_help() {
    println!("Usage: stimdetector [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH       Load engine configuration from a JSON file");
    println!("  -r, --sample-rate HZ    Simulated sample rate (default: 30000)");
    println!("  -s, --seconds N         Stop after N seconds (default: run until Ctrl+C)");
    println!("      --json              Print row matrices as JSON");
    println!("  -v, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Set RUST_LOG=stimdetector_core=debug to log every folded window.");
}

fn run(config: EngineConfig, options: &Options) -> Result<()> {
    let mut engine = StimEngine::new(config, NUM_CHANNELS);

    // Channel 0: self-triggered on the stimulus artefact, pulse on line 0
    let triggered = engine.add_module()?;
    engine.set_input_channel(triggered, Some(0))?;
    engine.set_output_channel(triggered, Some(0))?;

    // Channel 1: windows opened by the stimulator's gate line
    let gated = engine.add_module()?;
    engine.set_input_channel(gated, Some(1))?;
    engine.set_gate_channel(gated, Some(GATE_LINE))?;

    let (stream, endpoints) = RealtimeStream::new(engine, options.sample_rate, NUM_CHANNELS);
    let StreamEndpoints {
        gate_tx,
        events_rx,
        control,
    } = endpoints;
    let dropped = stream.dropped_counter();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    let realtime_running = running.clone();
    let realtime = std::thread::Builder::new()
        .name("stimdetector-rt".into())
        .spawn(move || acquisition_loop(stream, gate_tx, realtime_running))?;

    println!("Simulated acquisition at {} Hz. Press Ctrl+C to stop.", options.sample_rate);
    println!();

    let rt = tokio::runtime::Runtime::new()?;
    let pulses = Arc::new(AtomicU64::new(0));
    let monitor_pulses = pulses.clone();
    rt.block_on(monitoring_loop(
        control,
        events_rx,
        monitor_pulses,
        dropped,
        running.clone(),
        options.seconds.map(Duration::from_secs),
        options.json,
    ));

    running.store(false, Ordering::SeqCst);
    if realtime.join().is_err() {
        warn!("Real-time thread panicked");
    }

    println!();
    println!("Done. {} output pulses emitted.", pulses.load(Ordering::Relaxed));
    Ok(())
}

/// Feed synthetic buffers to the stream at the simulated sample rate
fn acquisition_loop(
    mut stream: RealtimeStream,
    mut gate_tx: ringbuf::HeapProd<TtlEvent>,
    running: Arc<AtomicBool>,
) {
    let sample_rate = stream.sample_rate();
    // Whole buffers per stimulus cycle, so every stimulus lands at offset 0
    let period = EvokedSignal::new(sample_rate).period();
    let period = period.div_ceil(BUFFER_SIZE).max(1) * BUFFER_SIZE;
    let mut sources = [
        EvokedSignal::new(sample_rate).with_period_samples(period),
        EvokedSignal::new(sample_rate)
            .with_period_samples(period)
            .with_baseline(-20.0),
    ];
    let mut buffer = SampleBuffer::new(NUM_CHANNELS, BUFFER_SIZE);
    let buffer_duration = Duration::from_secs_f64(BUFFER_SIZE as f64 / sample_rate);
    let mut gate_high = false;

    info!(
        buffer_size = BUFFER_SIZE,
        "Acquisition started ({:.2} ms per buffer)",
        buffer_duration.as_secs_f64() * 1000.0
    );

    while running.load(Ordering::SeqCst) {
        let mut stimulus = false;
        for (ch, source) in sources.iter_mut().enumerate() {
            if let Some(samples) = buffer.channel_mut(ch) {
                stimulus |= !source.fill_buffer(samples).is_empty();
            }
        }

        // The stimulator raises its gate for the buffer carrying the stimulus
        if gate_high {
            let _ = gate_tx.try_push(TtlEvent::off(GATE_LINE));
            gate_high = false;
        }
        if stimulus {
            let _ = gate_tx.try_push(TtlEvent::on(GATE_LINE));
            gate_high = true;
        }

        stream.process_buffer(&mut buffer);
        std::thread::sleep(buffer_duration);
    }

    info!(buffers = stream.buffers_processed(), "Acquisition stopped");
}

/// Periodically print row matrices and split rows
async fn monitoring_loop(
    control: ControlHandle,
    events_rx: Receiver<DigitalEvent>,
    pulses: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    limit: Option<Duration>,
    json: bool,
) {
    let started = tokio::time::Instant::now();
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut last_split = started;

    while running.load(Ordering::SeqCst) {
        interval.tick().await;

        let asserted = events_rx.try_iter().filter(|e| e.asserted).count() as u64;
        pulses.fetch_add(asserted, Ordering::Relaxed);

        for info in control.modules() {
            let Ok(rows) = control.row_matrix(info.id) else {
                continue;
            };
            if json {
                match serde_json::to_string(&rows) {
                    Ok(line) => println!("{{\"module\":{},\"rows\":{}}}", info.id, line),
                    Err(e) => warn!("Failed to serialize rows: {}", e),
                }
                continue;
            }
            for row in rows {
                println!(
                    "module {} row {} | n: {:>5} | min: {:>8.2} | max: {:>8.2} | p2p: {:>8.2} | latency: {:>6.2}ms | slope: {:>8.5}",
                    info.id,
                    row.index,
                    row.count,
                    row.y_min,
                    row.y_max,
                    row.peak_to_peak,
                    row.latency_ms,
                    row.slope
                );
            }
        }

        let lost = dropped.load(Ordering::Relaxed);
        if lost > 0 {
            warn!(dropped = lost, "Output events dropped");
        }

        if last_split.elapsed() >= SPLIT_INTERVAL {
            for info in control.modules() {
                if let Err(e) = control.split_row(info.id) {
                    warn!("Failed to split row: {}", e);
                }
            }
            last_split = tokio::time::Instant::now();
        }

        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            info!("Time limit reached");
            break;
        }
    }
}

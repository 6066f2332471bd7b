mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use cli::{AnalyzeArgs, Cli, Command, MonitorArgs};
use noisefloor::audio::analysis::analyze_dump;
use noisefloor::audio::buffer::next_power_of_two;
use noisefloor::audio::features::SnrBand;
use noisefloor::audio::mic_test::run_mic_test;
use noisefloor::config::{self, Config};
use noisefloor::device::{
    default_buffer_len, list_input_devices, CaptureDevice, FileDevice, MicDevice, MicOptions, StreamSpec,
};
use noisefloor::engine::CaptureEngine;
use noisefloor::persist;
use noisefloor::sink::{DisplaySink, JsonSink, NullSink, TerminalSink};
use noisefloor::CaptureError;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    let mut cfg = Config::default();
    if let Some(path) = config::find_config_path(cli.config.as_deref()) {
        match config::load_config(&path) {
            Ok(loaded) => {
                log::info!("Loaded config from {}", path.display());
                cfg = loaded;
            }
            Err(e) => log::warn!("{:#}", e),
        }
    }
    // Merge: config values apply only when CLI is at its default
    if cli.sample_rate == 44_100 { cli.sample_rate = cfg.capture.sample_rate; }
    if cli.device.is_none() { cli.device = cfg.capture.device.clone(); }

    match &cli.command {
        Command::Devices => list_devices(),
        Command::Baseline { out } => record_baseline(&cli, &cfg, out.as_deref()),
        Command::Baselines => list_saved_baselines(),
        Command::Monitor(args) => monitor(&cli, &cfg, args),
        Command::Analyze(args) => analyze(args),
        Command::TestMic { seconds } => test_mic(&cli, &cfg, *seconds),
    }
}

/// Attach the user-facing notification to a pipeline error.
fn notify(e: CaptureError) -> anyhow::Error {
    let message = e.notification();
    anyhow::Error::new(e).context(message)
}

fn seconds(value: f32) -> Result<Duration> {
    Duration::try_from_secs_f32(value).with_context(|| format!("Invalid duration: {}s", value))
}

fn open_device(cli: &Cli, cfg: &Config, paced: bool) -> Result<Box<dyn CaptureDevice>> {
    if let Some(input) = &cli.input {
        if !input.exists() {
            anyhow::bail!("Input file not found: {}", input.display());
        }
        return Ok(Box::new(FileDevice::open(input, cli.sample_rate, paced)?));
    }
    let options = MicOptions {
        device_name: cli.device.clone(),
        read_timeout: cfg.capture.read_timeout(),
        queue_capacity: cfg.capture.channel_capacity,
    };
    let mic = MicDevice::open(StreamSpec::mono(cli.sample_rate), options).map_err(notify)?;
    Ok(Box::new(mic))
}

fn list_devices() -> Result<()> {
    let names = list_input_devices().map_err(notify)?;
    if names.is_empty() {
        println!("No microphones found.");
        return Ok(());
    }
    println!("Available microphones:");
    for name in &names {
        println!("  {}", name);
    }
    Ok(())
}

fn record_baseline(cli: &Cli, cfg: &Config, out: Option<&Path>) -> Result<()> {
    let device = open_device(cli, cfg, false)?;
    let sample_rate = device.spec().sample_rate;
    let mut engine = CaptureEngine::new(device, Arc::new(NullSink), cfg.engine_options());

    println!("Recording baseline noise, keep quiet...");
    engine.start_baseline_capture().map_err(notify)?;
    let profile = engine.wait_for_baseline().map_err(notify)?;

    let path = match out {
        Some(path) => path.to_path_buf(),
        None => {
            let dir = config::baseline_dir();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            dir.join(format!("baseline-{}.{}", stamp, persist::BASELINE_EXT))
        }
    };
    persist::save_baseline(&path, &profile, sample_rate)?;
    println!("Baseline saved to {}", path.display());
    Ok(())
}

fn list_saved_baselines() -> Result<()> {
    let dir = config::baseline_dir();
    let found = persist::list_baselines(&dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    if found.is_empty() {
        println!("No saved baselines in {}", dir.display());
        return Ok(());
    }
    println!("Saved baselines:");
    for path in &found {
        match persist::load_baseline(path) {
            Ok((profile, rate)) => {
                println!("  {:<40} {} samples @ {} Hz", path.display(), profile.len(), rate)
            }
            Err(e) => println!("  {:<40} unreadable ({:#})", path.display(), e),
        }
    }
    Ok(())
}

fn monitor(cli: &Cli, cfg: &Config, args: &MonitorArgs) -> Result<()> {
    let limit = args.duration.map(seconds).transpose()?;
    let device = open_device(cli, cfg, true)?;
    let sample_rate = device.spec().sample_rate;

    let terminal = (!args.json).then(|| Arc::new(TerminalSink::new(sample_rate)));
    let sink: Arc<dyn DisplaySink> = match &terminal {
        Some(bar) => bar.clone() as Arc<dyn DisplaySink>,
        None => Arc::new(JsonSink::new(std::io::stdout())),
    };

    let mut options = cfg.engine_options();
    if args.no_spectrum {
        options.spectrum = false;
    }
    let mut engine = CaptureEngine::new(device, sink, options);

    match &args.baseline {
        Some(path) => {
            let (profile, rate) = persist::load_baseline(path)?;
            if rate != sample_rate {
                log::warn!(
                    "Baseline {} was captured at {} Hz, device runs at {} Hz",
                    path.display(),
                    rate,
                    sample_rate
                );
            }
            engine.set_baseline(profile).map_err(notify)?;
        }
        None => {
            log::info!("Recording baseline noise, keep quiet...");
            engine.start_baseline_capture().map_err(notify)?;
            engine.wait_for_baseline().map_err(notify)?;
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping capture...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    match &args.dump {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create dump file: {}", path.display()))?;
            engine.start_recording_to(file).map_err(notify)?;
        }
        None => engine.start_recording().map_err(notify)?,
    }

    let started = Instant::now();
    while running.load(Ordering::SeqCst)
        && engine.is_active()
        && limit.map_or(true, |limit| started.elapsed() < limit)
    {
        std::thread::sleep(Duration::from_millis(50));
    }
    engine.stop();
    if let Some(bar) = &terminal {
        bar.finish();
    }

    let metrics = engine.metrics();
    log::info!(
        "Processed {} frames in {:.1}s ({} empty reads)",
        metrics.frames,
        started.elapsed().as_secs_f32(),
        metrics.transient_failures
    );
    if let Some(path) = &args.dump {
        log::info!("Dumped {} samples to {}", metrics.dumped_samples, path.display());
    }

    match engine.last_error() {
        // A file device ending is the normal end of a replay.
        Some(CaptureError::DeviceUnavailable(msg)) if cli.input.is_some() => {
            log::info!("Input finished: {}", msg);
            Ok(())
        }
        Some(e) => Err(notify(e)),
        None => Ok(()),
    }
}

fn analyze(args: &AnalyzeArgs) -> Result<()> {
    let (baseline, sample_rate) = persist::load_baseline(&args.baseline)?;
    let samples = persist::read_pcm_file(&args.dump)?;
    let frame_len = args.frame_len.unwrap_or_else(|| default_buffer_len(sample_rate));
    let window_size = args.window_size.unwrap_or_else(|| next_power_of_two(frame_len));

    log::info!(
        "Analyzing {} ({} samples, {} per frame, window {})",
        args.dump.display(),
        samples.len(),
        frame_len,
        window_size
    );
    let report = analyze_dump(&samples, &baseline, frame_len, window_size, sample_rate).map_err(notify)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut bands = [0usize; 3];
    for frame in &report.frames {
        let slot = match SnrBand::from_ratio(frame.ratio) {
            SnrBand::Low => 0,
            SnrBand::Medium => 1,
            SnrBand::High => 2,
        };
        bands[slot] += 1;
    }
    println!("Frames:   {}", report.frames.len());
    println!("SNR mean: {:.2} dB", report.mean_db);
    println!("SNR min:  {:.2} dB", report.min_db);
    println!("SNR max:  {:.2} dB", report.max_db);
    println!("Bands:    low {}, medium {}, high {}", bands[0], bands[1], bands[2]);
    Ok(())
}

fn test_mic(cli: &Cli, cfg: &Config, secs: f32) -> Result<()> {
    let duration = seconds(secs)?;
    let mut device = open_device(cli, cfg, true)?;
    let sample_rate = device.spec().sample_rate;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));

    let report = run_mic_test(device.as_mut(), duration, |frame| {
        let peak = frame.samples().iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        spinner.set_message(format!("Listening... peak {}", peak));
    });
    spinner.finish_and_clear();
    device.release();
    let report = report.map_err(notify)?;

    println!("Microphone test completed.");
    println!("Frames read:       {}", report.frames);
    println!("Average amplitude: {:.1}", report.amplitude);
    match report.spectrum.peak_bin() {
        Some((bin, magnitude)) if magnitude > 0.0 => println!(
            "Dominant frequency: {:.0} Hz",
            report.spectrum.bin_frequency(bin, sample_rate)
        ),
        _ => println!("Dominant frequency: none (silence)"),
    }
    Ok(())
}

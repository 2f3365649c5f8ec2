mod cli;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cli::{AnalyzeArgs, Cli, Command, DeviceKind, PlayArgs};
use config::Config;
use lightshow::audio::analysis::{self, AnalysisSettings, BrightnessCurve};
use lightshow::output::stream::StreamDevice;
use lightshow::output::{ColorOrder, LogDevice, Output};
use lightshow::player::{default_backend, AudioBackend, SilentBackend};
use lightshow::sync::clock::{MonotonicClock, SleepThenSpin};
use lightshow::sync::controller::Stage;
use lightshow::sync::{PlaybackSettings, ShowOutcome};
use lightshow::FrameTable;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let cfg = match config::find_config(cli.config.clone()) {
        Some(path) => match config::load_config(&path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                Config::default()
            }
        },
        None => Config::default(),
    };

    match cli.command {
        Command::Analyze(args) => analyze(args, &cfg),
        Command::Play(args) => play(args, &cfg),
        Command::Inspect { frames } => inspect(&frames),
    }
}

fn analyze(mut args: AnalyzeArgs, cfg: &Config) -> Result<()> {
    // Merge: config values apply only when the CLI is at its default
    let c = &cfg.analysis;
    if args.sample_rate == 8000 { args.sample_rate = c.sample_rate; }
    if args.frame_duration == 0.04 { args.frame_duration = c.frame_duration; }
    if args.overlap == 0.5 { args.overlap = c.overlap; }
    if args.rms_threshold == 0.02 { args.rms_threshold = c.rms_threshold; }
    if !args.hold { args.hold = c.hold; }
    if args.alpha == 0.0 { args.alpha = c.alpha; }
    if args.curve == BrightnessCurve::Log { args.curve = c.brightness_curve; }
    if args.median_kernel == 1 { args.median_kernel = c.median_kernel; }

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_table_path(&args.input));

    let settings = AnalysisSettings {
        sample_rate: args.sample_rate,
        frame_duration: args.frame_duration,
        overlap: args.overlap,
        rms_threshold: args.rms_threshold,
        hold: args.hold,
        alpha: args.alpha,
        curve: args.curve,
        median_kernel: args.median_kernel,
        ..Default::default()
    };

    log::info!("Input: {}", args.input.display());
    log::info!("Output: {}", output.display());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
    spinner.set_message("Analyzing audio...");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let result = analysis::extract(&args.input, &settings);
    spinner.finish_and_clear();
    let (summary, table) = result.with_context(|| format!("Analysis of {} failed", args.input.display()))?;

    table
        .save(&output)
        .with_context(|| format!("Could not write {}", output.display()))?;

    log::info!(
        "Done! {} frames ({:.1}s, {} pitched, {} gated) -> {}",
        summary.frame_count,
        summary.duration,
        summary.pitched_windows,
        summary.gated_windows,
        output.display()
    );
    Ok(())
}

fn default_table_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "track".into());
    input.with_file_name(format!("{}_frames.csv", stem))
}

fn play(mut args: PlayArgs, cfg: &Config) -> Result<()> {
    let p = &cfg.playback;
    let o = &cfg.output;
    if args.smooth_alpha == 0.3 { args.smooth_alpha = p.smooth_alpha; }
    if args.brightness_gate == 10 { args.brightness_gate = p.brightness_gate; }
    if args.min_update_interval == 0.1 { args.min_update_interval = p.min_update_interval; }
    if args.led_count == 50 { args.led_count = o.led_count; }
    if args.color_order == ColorOrder::Grb { args.color_order = o.color_order; }
    if args.brightness == 255 { args.brightness = o.brightness; }
    if args.device == DeviceKind::Log {
        args.device = DeviceKind::from_str(&o.device, true)
            .map_err(|e| anyhow::anyhow!("Bad output device in config: {}", e))?;
    }
    if args.path.is_none() {
        args.path = o.path.clone();
    }

    let settings = PlaybackSettings {
        smooth_alpha: args.smooth_alpha,
        brightness_gate: args.brightness_gate,
        min_update_interval: Duration::try_from_secs_f32(args.min_update_interval)
            .context("--min-interval must be a non-negative number of seconds")?,
        fade_steps: p.fade_steps,
        fade_duration: Duration::try_from_secs_f32(p.fade_duration)
            .context("fade_duration must be a non-negative number of seconds")?,
        max_consecutive_write_failures: p.max_consecutive_write_failures,
    };

    let output = match args.device {
        DeviceKind::Log => Output::new(Box::new(LogDevice::new(args.led_count))),
        DeviceKind::Stream => {
            let path = args.path.as_ref().context("--device stream needs --path")?;
            Output::new(Box::new(StreamDevice::open(path, args.led_count, args.color_order)?))
        }
    }
    .dimmed(args.brightness);

    let backend: Arc<dyn AudioBackend> = if args.silent {
        Arc::new(SilentBackend)
    } else {
        Arc::from(default_backend())
    };
    let wait = SleepThenSpin {
        spin_margin: Duration::from_millis(p.spin_margin_ms),
    };

    let stage = Stage::new(
        output,
        backend,
        Arc::new(MonotonicClock::new()),
        Arc::new(wait),
        settings,
    );

    // Ctrl-C stops the show through the normal fade-out
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("Could not install the Ctrl-C handler")?;
    }

    let handle = stage
        .start(&args.frames, &args.audio)
        .context("Show could not start")?;

    let pb = ProgressBar::new(handle.frame_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames ({eta} remaining)")?
            .progress_chars("=>-"),
    );
    handle.supervise(&interrupted, Duration::from_millis(100), |pos| pb.set_position(pos as u64));

    let report = handle.join()?;
    pb.finish_with_message("Show complete");

    log::info!(
        "{:?}: {}/{} frames shown, {} rate-limited, {} write failures",
        report.outcome,
        report.frames_emitted,
        report.frames_total,
        report.frames_rate_limited,
        report.write_failures
    );
    if report.outcome == ShowOutcome::DeviceFailed {
        anyhow::bail!("Output device kept failing; show abandoned");
    }
    Ok(())
}

fn inspect(frames: &Path) -> Result<()> {
    let table = FrameTable::load(frames).with_context(|| format!("Could not read {}", frames.display()))?;
    let stats = table.stats();
    println!("{}", frames.display());
    println!("  frames:          {}", stats.frames);
    println!("  duration:        {:.3}s", stats.duration);
    println!("  mean brightness: {:.1}", stats.mean_brightness);
    println!("  silent frames:   {}", stats.silent_frames);
    for (note, count) in &stats.notes {
        let share = *count as f64 / stats.frames.max(1) as f64 * 100.0;
        println!("  {:<2} {:>8} ({:5.1}%)", note.letter(), count, share);
    }
    Ok(())
}

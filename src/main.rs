// src/main.rs

use anyhow::{bail, Context, Result};
use clap::Parser;
use deepzoom_render::{
    checkpoint::CheckpointStore,
    config::Config,
    control::{
        exit_process,
        signals::{self, SignalGuard},
        terminal::TerminalKeys,
        ControlListener, ControlState,
    },
    estimate,
    kernel::{BoxDownsampler, EscapeTimeKernel},
    orchestrator::{RenderOrchestrator, RunOutcome, StartPoint},
};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_SCALE: u32 = 4;

#[derive(Parser, Debug)]
#[command(author, version, about = "Render a deep-zoom tile pyramid strip by strip")]
struct Args {
    /// Resolution multiplier over the base size [default: 4]
    #[arg(short, long)]
    scale: Option<u32>,

    /// Continue from the saved checkpoint; fails when there is none
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Discard any checkpoint and previously written tiles
    #[arg(long)]
    fresh: bool,

    /// Do not read control keys from the terminal
    #[arg(long)]
    no_control: bool,

    /// Directory for the tiles, manifest and checkpoint
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of field worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(dir) = &args.output {
        config.output.directory = dir.clone();
    }
    if let Some(workers) = args.workers {
        config.pipeline.workers = Some(workers);
    }
    if args.no_control {
        config.control.enabled = false;
    }

    let checkpoints = CheckpointStore::new(config.output.checkpoint_path());
    let (scale, start) = choose_start(&args, &mut config, &checkpoints)?;
    log_estimates(&config, scale);

    let control = Arc::new(ControlState::new(
        config.control.exit_confirm_window(),
        config.pipeline.pause_poll(),
    ));
    let listener = if config.control.enabled {
        let keys = TerminalKeys::open()
            .context("Control keys need a terminal on stdin (run with --no-control)")?;
        let guard = SignalGuard::install()?;
        let listener = ControlListener::spawn(
            keys,
            Arc::clone(&control),
            signals::interrupted_flag(),
            exit_process,
        )?;
        info!("Press 'p' at any time to pause/resume");
        info!("Press 's' while paused to save progress");
        info!(
            "Press 'e' twice within {:.0} seconds to force quit (or Ctrl+C)",
            config.control.exit_confirm_window().as_secs_f64()
        );
        Some((listener, guard))
    } else {
        None
    };

    let field = Arc::new(EscapeTimeKernel::new(
        config.render.max_iterations,
        config.render.escape_radius_sq,
    ));
    info!("Starting generation at {}x scale", scale);
    let outcome = RenderOrchestrator::new(config, scale, field, Arc::new(BoxDownsampler), control)
        .and_then(|orchestrator| orchestrator.run(start));

    // Put the terminal back before the final report.
    if let Some((listener, guard)) = listener {
        listener.stop();
        drop(guard);
    }

    match outcome? {
        RunOutcome::Completed { manifest } => {
            info!("Deep zoom pyramid complete: {}", manifest.display());
        }
        RunOutcome::Saved { checkpoint } => {
            info!(
                "Progress saved to {} ({}/{} strips). Run again to resume.",
                checkpoints.path().display(),
                checkpoint.current_strip,
                checkpoint.total_strips
            );
        }
    }
    Ok(())
}

/// Decides between a fresh run and resuming the saved one. A resumed run
/// adopts the checkpoint's scale and render parameters.
fn choose_start(args: &Args, config: &mut Config, checkpoints: &CheckpointStore) -> Result<(u32, StartPoint)> {
    let requested = args.scale.unwrap_or(DEFAULT_SCALE);
    if args.fresh {
        return Ok((requested, StartPoint::Fresh));
    }
    let Some(checkpoint) = checkpoints.load() else {
        if args.resume {
            bail!("No checkpoint to resume at {}", checkpoints.path().display());
        }
        return Ok((requested, StartPoint::Fresh));
    };

    info!(
        "Save found: scale {}x, {}/{} strips ({:.1}% complete)",
        checkpoint.scale(),
        checkpoint.current_strip,
        checkpoint.total_strips,
        checkpoint.percent_complete()
    );
    if let Some(scale) = args.scale {
        if scale != checkpoint.scale() {
            warn!(
                "Ignoring --scale {}: resuming the saved {}x run (pass --fresh to start over)",
                scale,
                checkpoint.scale()
            );
        }
    }
    for mismatch in checkpoint.mismatches(&config.render) {
        warn!("Using the checkpoint's value for {}", mismatch);
    }
    checkpoint.apply_to(&mut config.render);
    Ok((checkpoint.scale(), StartPoint::Resume(checkpoint)))
}

fn log_estimates(config: &Config, scale: u32) {
    let (peak, total) = estimate::storage_estimate(scale);
    info!("Scale {}x:", scale);
    info!(
        "  Resolution: {} x {} pixels",
        config.render.base_width * scale as usize,
        config.render.base_height * scale as usize
    );
    info!("  Estimated time: {}", estimate::time_estimate(scale));
    info!("  Peak temp storage: {}", peak);
    info!("  Final DeepZoom size: {}", total);
}

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use visionflow::{Config, Engine};

/// Multi-camera video analysis pipeline
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the JSON configuration document
    config: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("Failed to install signal handler")?;
    }

    info!("Loading configuration from {}", args.config.display());
    let config = Config::from_file(&args.config).context("Configuration error")?;
    info!(
        "Configuration loaded: {} camera(s), clips of {}s at {} fps, {} sampled frames",
        config.cameras.len(),
        config.clip_length,
        config.gst_target_fps,
        config.sampled_frames_count
    );

    if config.cameras.is_empty() {
        anyhow::bail!("No cameras configured");
    }

    let cameras = config.cameras.clone();
    let mut engine = Engine::new(config).context("Engine construction failed")?;

    for camera in &cameras {
        info!(
            "Adding camera {} ({:?}): {}",
            camera.camera_id, camera.source_type, camera.source_url
        );
        if let Err(e) = engine.add_source(
            &camera.source_url,
            &camera.camera_id,
            camera.source_type,
            camera.stream_codec,
        ) {
            warn!("Skipping source {}: {}", camera.source_url, e);
        }
    }

    engine.start().context("Engine start failed")?;
    info!("Processing started; press Ctrl+C to stop");

    let started = Instant::now();
    while !shutdown.load(Ordering::SeqCst) && engine.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("Shutting down engine");
    engine.stop();

    info!(
        "Run summary: {:.0}s elapsed, {} clips processed, {} clips dropped",
        started.elapsed().as_secs_f64(),
        engine.clips_processed(),
        engine.dropped_clips()
    );

    Ok(())
}

//! person_detectd - single-camera person detection daemon
//!
//! This daemon:
//! 1. Captures frames from the configured camera on a capture thread
//! 2. Runs the detection model on the freshest frame each cycle
//! 3. Sends a readings record per cycle to the configured sink
//! 4. Serves annotated frames over a loopback MJPEG preview stream
//!
//! Ctrl-C (or `--max-seconds`) requests a cooperative shutdown.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use person_detection::{
    build_sink, config::CONFIG_ENV, load_engine, publish::MjpegConfig, publish::MjpegServer,
    CaptureConfig, CaptureStream, LatestFrame, Pipeline, PipelineConfig, PipelineState,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect people in a camera feed and publish readings")]
struct Args {
    /// JSON configuration file.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(long)]
    max_seconds: Option<u64>,

    /// JPEG quality of the preview stream.
    #[arg(long, default_value_t = 80)]
    jpeg_quality: u8,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = PipelineConfig::load_from(args.config.as_deref())?;
    log::info!(
        "person_detectd {} starting: camera {} ({}x{}), model {}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera.id,
        cfg.camera.width,
        cfg.camera.height,
        cfg.model.model_path().display()
    );

    let engine = load_engine(&cfg)?;
    let sink = build_sink(&cfg.sink)?;
    let latest = Arc::new(LatestFrame::new());

    let preview = match &cfg.output.stream_addr {
        Some(addr) => {
            let preview_cfg = MjpegConfig {
                addr: addr.clone(),
                quality: args.jpeg_quality,
            };
            Some(MjpegServer::new(preview_cfg, latest.clone()).spawn()?)
        }
        None => None,
    };

    let source = CaptureStream::start(CaptureConfig::from_camera(&cfg.camera))
        .with_context(|| format!("failed to open camera {}", cfg.camera.id))?;
    let pipeline = Pipeline::new(&cfg, Box::new(source), engine, sink, latest)?;
    let shutdown = pipeline.shutdown_handle();

    ctrlc::set_handler({
        let shutdown = shutdown.clone();
        move || {
            log::info!("shutdown signal received");
            shutdown.request_shutdown();
        }
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {err}"))?;

    let handle = pipeline.spawn()?;
    let deadline = args
        .max_seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    while !handle.is_finished() {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline && shutdown.state() == PipelineState::Running {
                log::info!("max run time reached, shutting down");
                shutdown.request_shutdown();
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let stats = handle.stats();
    let result = handle.join();
    if let Some(preview) = preview {
        preview.stop()?;
    }
    log::info!(
        "person_detectd stopped after {} cycles ({} detections, {} skipped)",
        stats.cycles,
        stats.detections,
        stats.skipped_cycles
    );
    result
}

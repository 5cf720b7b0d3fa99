//! detector - Skywatch detection daemon
//!
//! This daemon:
//! 1. Merges configuration from defaults, file, environment and CLI
//! 2. Resolves `auto` camera and engine selections against the host
//! 3. Runs the capture -> detect -> track -> target -> alert -> render cycle
//! 4. Serves the annotated stream over MJPEG
//! 5. Disarms and releases the actuator on shutdown (Ctrl-C or end of stream)

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use skywatch::config::{CameraType, Config, ConfigOverrides, EngineType, TrackerType, CONFIG_PATH_ENV};
use skywatch::{ArmSwitch, DetectionPipeline, HardwareProbe};

#[derive(Parser, Debug)]
#[command(
    name = "detector",
    version,
    about = "Real-time drone detection, tracking and net-launcher targeting"
)]
struct Args {
    /// Config file (.yaml, .yml, .json or .toml)
    #[arg(short, long, value_name = "PATH", env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Frame source
    #[arg(long, value_enum)]
    camera: Option<CameraType>,

    /// Inference engine
    #[arg(long, value_enum)]
    engine: Option<EngineType>,

    /// Tracker
    #[arg(long, value_enum)]
    tracker: Option<TrackerType>,

    /// Video file for `--camera video`
    #[arg(long, value_name = "PATH")]
    video: Option<String>,

    /// ONNX model path
    #[arg(long, value_name = "PATH")]
    model: Option<String>,

    /// Detection confidence threshold
    #[arg(long, value_name = "0..1")]
    confidence: Option<f32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    #[arg(long)]
    fps: Option<u32>,

    /// Streaming server port
    #[arg(long)]
    port: Option<u16>,

    /// Disable the streaming server
    #[arg(long)]
    no_stream: bool,

    /// Log summaries instead of drawing overlays
    #[arg(long)]
    headless: bool,

    /// Alert webhook URL
    #[arg(long, value_name = "URL")]
    webhook: Option<String>,

    /// Log level (error|warn|info|debug|trace); RUST_LOG takes precedence
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Arm the net launcher at startup (requires targeting.fire_net_enabled)
    #[arg(long)]
    arm: bool,

    /// Print the merged configuration as YAML and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            camera_type: self.camera,
            engine_type: self.engine,
            tracker_type: self.tracker,
            video_path: self.video.clone(),
            model_path: self.model.clone(),
            confidence_threshold: self.confidence,
            width: self.width,
            height: self.height,
            fps: self.fps,
            stream_port: self.port,
            streaming_enabled: self.no_stream.then_some(false),
            headless: self.headless.then_some(true),
            webhook_url: self.webhook.clone(),
            log_level: self.log_level.clone(),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref(), &args.overrides())
        .context("loading configuration")?;

    if args.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();
    log::info!("detector {} starting", env!("CARGO_PKG_VERSION"));

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let probe = HardwareProbe::detect();
    if let Some(model) = &probe.board_model {
        log::info!("board: {model}");
    }

    let arm = ArmSwitch::new();
    let (pipeline, source) = DetectionPipeline::build(config, &probe, arm)?;
    if args.arm {
        pipeline
            .arm()
            .map_err(|reason| anyhow!("refusing to arm: {reason}"))?;
    }
    if let Some(port) = pipeline
        .config()
        .streaming
        .enabled
        .then_some(pipeline.config().streaming.port)
    {
        log::info!("stream endpoints on port {port}: /stream /snapshot /status /health");
    }

    let summary = pipeline.run(source, stop)?;
    log::info!(
        "detector stopped: {} frames, {} fire attempts, {} alerts",
        summary.frames_processed,
        summary.fire_attempts,
        summary.alerts_sent
    );
    Ok(())
}

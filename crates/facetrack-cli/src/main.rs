use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facetrack_core::enroll::collect_gallery;
use facetrack_core::pipeline::{self, RunSummary};
use facetrack_core::{
    DetectionPipeline, FrameProcessor, Gallery, OnnxFaceExtractor, TrackingPipeline,
    YoloFaceDetector,
};
use facetrack_hw::{frame, Camera, FrameSource, ImageSequence, SourceError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod sinks;

use config::{Config, Overrides};
use sinks::{JsonLinesSink, SnapshotSink};

/// Frame rate assumed when a camera does not report one.
const FALLBACK_FPS: f64 = 30.0;

#[derive(Parser)]
#[command(name = "facetrack", about = "Real-time face tracking and recognition")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a gallery from a directory holding one photo folder per person
    Collect {
        /// Root directory: <root>/<person>/<photo>.{png,jpg,jpeg}
        photos: PathBuf,
        /// Gallery file to write
        #[arg(short, long, default_value = "persons.json")]
        output: PathBuf,
    },
    /// Detect and identify every face on every frame
    Recognize(StreamArgs),
    /// Follow one face, detecting periodically and tracking in between
    Track(StreamArgs),
}

#[derive(Args)]
struct StreamArgs {
    /// Image directory or V4L2 device (default: the configured camera)
    input: Option<PathBuf>,
    /// Gallery file produced by `collect`; without one every face is unknown
    #[arg(short, long)]
    gallery: Option<PathBuf>,
    /// Write annotated PNG frames to this directory instead of JSON lines on stdout
    #[arg(long)]
    snapshots: Option<PathBuf>,
}

#[derive(Clone, Copy)]
enum Mode {
    Detect,
    Track,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config =
        Config::load(cli.overrides.config.as_deref()).context("failed to load configuration")?;
    config.apply_overrides(&cli.overrides);
    config.validate()?;

    match cli.command {
        Commands::Collect { photos, output } => collect(&config, &photos, &output),
        Commands::Recognize(args) => stream(config, args, Mode::Detect).await,
        Commands::Track(args) => stream(config, args, Mode::Track).await,
    }
}

fn load_models(config: &Config) -> Result<(YoloFaceDetector, OnnxFaceExtractor)> {
    let detector = YoloFaceDetector::load(&config.detector_path())
        .context("failed to load face detector")?;
    let extractor = OnnxFaceExtractor::load(&config.extractor_path())
        .context("failed to load face extractor")?;
    Ok((detector, extractor))
}

fn collect(config: &Config, photos: &Path, output: &Path) -> Result<()> {
    let (mut detector, mut extractor) = load_models(config)?;
    let gallery = collect_gallery(photos, &mut detector, &mut extractor, config.min_confidence)
        .with_context(|| format!("failed to collect faces from {}", photos.display()))?;
    if gallery.is_empty() {
        tracing::warn!("no person yielded a usable face");
    }
    gallery
        .save(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(persons = gallery.len(), output = %output.display(), "gallery written");
    Ok(())
}

fn open_source(config: &Config, input: Option<&Path>) -> Result<Box<dyn FrameSource>> {
    let input = input.unwrap_or_else(|| Path::new(&config.camera_device));
    if input.is_dir() {
        let seq = ImageSequence::open(input, config.sequence_fps)
            .with_context(|| format!("could not open image sequence {}", input.display()))?;
        return Ok(Box::new(seq));
    }
    let device = input.to_string_lossy();
    let camera =
        Camera::open(&device).with_context(|| format!("could not open camera {device}"))?;
    Ok(Box::new(camera))
}

/// Load everything, then run the frame loop on a blocking thread until the
/// stream ends or Ctrl-C is pressed.
async fn stream(config: Config, args: StreamArgs, mode: Mode) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let summary =
        tokio::task::spawn_blocking(move || run_stream(&config, &args, mode, &stop)).await??;

    tracing::info!(
        frames = summary.frames,
        skipped = summary.skipped,
        identified = summary.identified,
        "done"
    );
    Ok(())
}

fn run_stream(
    config: &Config,
    args: &StreamArgs,
    mode: Mode,
    stop: &AtomicBool,
) -> Result<RunSummary> {
    let gallery = match &args.gallery {
        Some(path) => Gallery::load(path)
            .with_context(|| format!("failed to read gallery {}", path.display()))?,
        None => {
            tracing::warn!("no gallery given, every face will be unknown");
            Gallery::new()
        }
    };
    let gallery = Arc::new(gallery);
    let (detector, extractor) = load_models(config)?;
    let mut source = open_source(config, args.input.as_deref())?;
    let fps = source.fps().unwrap_or(FALLBACK_FPS);

    match mode {
        Mode::Detect => {
            let mut processor =
                DetectionPipeline::new(detector, extractor, gallery, config.pipeline());
            drive(&mut processor, source.as_mut(), fps, config, args, stop)
        }
        Mode::Track => {
            let mut processor =
                TrackingPipeline::new(detector, extractor, gallery, config.pipeline());
            drive(&mut processor, source.as_mut(), fps, config, args, stop)
        }
    }
}

fn drive(
    processor: &mut impl FrameProcessor,
    source: &mut dyn FrameSource,
    fps: f64,
    config: &Config,
    args: &StreamArgs,
    stop: &AtomicBool,
) -> Result<RunSummary> {
    let input_scale = config.input_scale;
    let frames = facetrack_hw::frames(source)
        .map(|f| f.and_then(|img| frame::scale(img, input_scale).map_err(SourceError::from)));

    let summary = match &args.snapshots {
        Some(dir) => {
            let mut sink = SnapshotSink::create(dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
            pipeline::run(processor, frames, fps, &mut sink, stop)?
        }
        None => pipeline::run(processor, frames, fps, &mut JsonLinesSink::stdout(), stop)?,
    };
    Ok(summary)
}

//! Per-frame recognition pipelines and the loop that drives them.
//!
//! [`TrackingPipeline`] follows one subject: detection runs only when the
//! [`PeriodicTrigger`] fires, the [`BoxTracker`] fills the frames in between,
//! and the tracked region is identified on every frame.
//! [`DetectionPipeline`] detects and identifies every face on every frame.

use crate::detector::{Detector, DetectorError, DEFAULT_MIN_CONFIDENCE};
use crate::extractor::{Extractor, ExtractorError};
use crate::gallery::Gallery;
use crate::similarity::SimilarityError;
use crate::tracker::{BoxTracker, TrackerConfig, TrackerError, DEFAULT_MEASUREMENT_NOISE};
use crate::trigger::PeriodicTrigger;
use crate::types::{BoundingBox, Face, Identity};
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.25;
pub const DEFAULT_DETECTION_FREQUENCY_MS: i64 = 160;

const MIN_STREAM_FPS: f64 = 1.0;
const MAX_STREAM_FPS: f64 = 30.0;

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("extractor: {0}")]
    Extractor(#[from] ExtractorError),
    #[error("tracker: {0}")]
    Tracker(#[from] TrackerError),
    #[error("similarity: {0}")]
    Similarity(#[from] SimilarityError),
    #[error("frame source: {0}")]
    Source(#[source] BoxedError),
    #[error("render sink: {0}")]
    Sink(#[source] BoxedError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub min_confidence: f32,
    /// Lowest cosine similarity accepted as a match.
    pub similarity_threshold: f32,
    /// Minimum interval between detection passes; 0 = every frame, negative = never.
    pub detection_frequency_ms: i64,
    pub measurement_noise: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            detection_frequency_ms: DEFAULT_DETECTION_FREQUENCY_MS,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
        }
    }
}

/// Everything the pipeline learned about one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    /// 1-based position in the stream.
    pub index: u64,
    pub timestamp_ms: i64,
    pub detection_fired: bool,
    pub faces: Vec<Face>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub frames: u64,
    pub skipped: u64,
    /// Faces matched to a gallery identity, summed over all frames.
    pub identified: u64,
}

/// Stream timestamp of a 1-based frame index, with the rate clamped to 1..=30 fps.
pub fn frame_timestamp_ms(index: u64, fps: f64) -> i64 {
    let fps = if fps.is_finite() {
        fps.clamp(MIN_STREAM_FPS, MAX_STREAM_FPS)
    } else {
        MAX_STREAM_FPS
    };
    (index as f64 / fps * 1000.0) as i64
}

/// Cut `roi` out of `frame`, clipped to the frame. `None` when nothing remains.
pub fn crop(frame: &RgbImage, roi: &BoundingBox) -> Option<RgbImage> {
    let clipped = roi.intersect(&BoundingBox::scene(frame.width(), frame.height()));
    if clipped.is_empty() {
        return None;
    }
    Some(
        imageops::crop_imm(
            frame,
            clipped.x as u32,
            clipped.y as u32,
            clipped.width as u32,
            clipped.height as u32,
        )
        .to_image(),
    )
}

/// Identify against `gallery`, short-circuiting to an unknown with
/// similarity -1 when the gallery has no entries.
fn lookup(
    gallery: &Gallery,
    extractor: &mut impl Extractor,
    face: &RgbImage,
    threshold: f32,
) -> Result<Identity, PipelineError> {
    if gallery.is_empty() {
        return Ok(Identity::unknown(-1.0));
    }
    let embedding = extractor.extract(face)?;
    Ok(gallery.identify(&embedding, threshold)?)
}

/// One step of a recognition pipeline.
pub trait FrameProcessor {
    fn process(
        &mut self,
        frame: &RgbImage,
        index: u64,
        timestamp_ms: i64,
    ) -> Result<FrameReport, PipelineError>;
}

/// Consumer of per-frame results. `Break` ends the run.
pub trait RenderSink {
    type Error: std::error::Error + Send + Sync + 'static;

    fn render(
        &mut self,
        report: &FrameReport,
        frame: &RgbImage,
    ) -> Result<ControlFlow<()>, Self::Error>;
}

/// Single-subject pipeline: trigger-gated detection feeding a box tracker.
pub struct TrackingPipeline<D, E> {
    detector: D,
    extractor: E,
    gallery: Arc<Gallery>,
    config: PipelineConfig,
    trigger: PeriodicTrigger,
    tracker: Option<BoxTracker>,
}

impl<D: Detector, E: Extractor> TrackingPipeline<D, E> {
    pub fn new(detector: D, extractor: E, gallery: Arc<Gallery>, config: PipelineConfig) -> Self {
        Self {
            detector,
            extractor,
            gallery,
            trigger: PeriodicTrigger::new(config.detection_frequency_ms),
            config,
            tracker: None,
        }
    }

    pub fn tracker(&self) -> Option<&BoxTracker> {
        self.tracker.as_ref()
    }
}

impl<D: Detector, E: Extractor> FrameProcessor for TrackingPipeline<D, E> {
    fn process(
        &mut self,
        frame: &RgbImage,
        index: u64,
        timestamp_ms: i64,
    ) -> Result<FrameReport, PipelineError> {
        let fired = self.trigger.should_fire(timestamp_ms);

        let scene = BoundingBox::scene(frame.width(), frame.height());
        let measurement_noise = self.config.measurement_noise;
        let tracker = self.tracker.get_or_insert_with(|| {
            BoxTracker::new(TrackerConfig {
                scene,
                measurement_noise,
            })
        });
        if tracker.scene() != scene {
            tracing::debug!(index, from = ?tracker.scene(), to = ?scene, "frame size changed");
            tracker.set_scene(scene);
        }

        let detection = if fired {
            match self.detector.detect(frame, self.config.min_confidence) {
                Ok(detections) => detections.into_iter().next(),
                Err(e) => {
                    // keep the filter in step with the stream
                    tracker.update(&BoundingBox::EMPTY)?;
                    return Err(e.into());
                }
            }
        } else {
            None
        };
        let measurement = detection
            .as_ref()
            .map_or(BoundingBox::EMPTY, |d| d.bounding_box);
        let roi = tracker.update(&measurement)?;

        let mut faces = Vec::new();
        if let Some(face) = crop(frame, &roi) {
            let identity = lookup(
                &self.gallery,
                &mut self.extractor,
                &face,
                self.config.similarity_threshold,
            )?;
            let (landmarks, confidence) =
                detection.map_or((None, 0.0), |d| (Some(d.landmarks), d.confidence));
            faces.push(Face::new(roi, landmarks, confidence, identity));
        }

        tracing::debug!(
            index,
            timestamp_ms,
            fired,
            roi = ?roi,
            name = faces.first().map(|f| f.name.as_str()),
            "tracked frame"
        );

        Ok(FrameReport {
            index,
            timestamp_ms,
            detection_fired: fired,
            faces,
        })
    }
}

/// Detects and identifies every face on every frame, no tracking.
pub struct DetectionPipeline<D, E> {
    detector: D,
    extractor: E,
    gallery: Arc<Gallery>,
    config: PipelineConfig,
}

impl<D: Detector, E: Extractor> DetectionPipeline<D, E> {
    pub fn new(detector: D, extractor: E, gallery: Arc<Gallery>, config: PipelineConfig) -> Self {
        Self {
            detector,
            extractor,
            gallery,
            config,
        }
    }
}

impl<D: Detector, E: Extractor> FrameProcessor for DetectionPipeline<D, E> {
    fn process(
        &mut self,
        frame: &RgbImage,
        index: u64,
        timestamp_ms: i64,
    ) -> Result<FrameReport, PipelineError> {
        let detections = self.detector.detect(frame, self.config.min_confidence)?;

        let mut faces = Vec::with_capacity(detections.len());
        for det in detections {
            let Some(face) = crop(frame, &det.bounding_box) else {
                continue;
            };
            let identity = lookup(
                &self.gallery,
                &mut self.extractor,
                &face,
                self.config.similarity_threshold,
            )?;
            faces.push(Face::new(
                det.bounding_box,
                Some(det.landmarks),
                det.confidence,
                identity,
            ));
        }

        tracing::debug!(index, timestamp_ms, faces = faces.len(), "detected frame");

        Ok(FrameReport {
            index,
            timestamp_ms,
            detection_fired: true,
            faces,
        })
    }
}

/// Pull frames through `processor` into `sink` until the stream ends,
/// `stop` is raised, or the sink asks to stop.
///
/// A frame the processor fails on is logged and counted as skipped. Errors
/// from the source or the sink end the run.
pub fn run<P, I, SE, K>(
    processor: &mut P,
    frames: I,
    fps: f64,
    sink: &mut K,
    stop: &AtomicBool,
) -> Result<RunSummary, PipelineError>
where
    P: FrameProcessor,
    I: IntoIterator<Item = Result<RgbImage, SE>>,
    SE: std::error::Error + Send + Sync + 'static,
    K: RenderSink,
{
    let mut summary = RunSummary::default();

    for frame in frames {
        if stop.load(Ordering::Relaxed) {
            tracing::info!("stop requested");
            break;
        }
        let frame = frame.map_err(|e| PipelineError::Source(Box::new(e)))?;
        summary.frames += 1;
        let index = summary.frames;
        let timestamp_ms = frame_timestamp_ms(index, fps);

        let report = match processor.process(&frame, index, timestamp_ms) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping frame");
                summary.skipped += 1;
                continue;
            }
        };
        summary.identified += report.faces.iter().filter(|f| f.name_id >= 0).count() as u64;

        let flow = sink
            .render(&report, &frame)
            .map_err(|e| PipelineError::Sink(Box::new(e)))?;
        if flow.is_break() {
            tracing::info!(index, "sink requested stop");
            break;
        }
    }

    tracing::info!(
        frames = summary.frames,
        skipped = summary.skipped,
        identified = summary.identified,
        "run finished"
    );
    Ok(summary)
}

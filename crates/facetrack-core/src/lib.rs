//! facetrack-core — real-time face tracking and identification.
//!
//! A periodic trigger gates an ONNX face detector, a Kalman box tracker
//! carries the subject between detection passes, and the tracked region is
//! embedded and matched against a gallery by cosine similarity.

pub mod detector;
pub mod enroll;
pub mod extractor;
pub mod gallery;
pub mod kalman;
pub mod pipeline;
pub mod similarity;
pub mod tracker;
pub mod trigger;
pub mod types;

pub use detector::{Detector, YoloFaceDetector};
pub use extractor::{Extractor, OnnxFaceExtractor};
pub use gallery::Gallery;
pub use pipeline::{
    DetectionPipeline, FrameProcessor, FrameReport, PipelineConfig, PipelineError, RenderSink,
    RunSummary, TrackingPipeline,
};
pub use tracker::{BoxTracker, TrackerConfig};
pub use trigger::PeriodicTrigger;
pub use types::{BoundingBox, Detection, Embedding, Face, Identity};

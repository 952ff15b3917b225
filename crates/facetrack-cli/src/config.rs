use clap::Args;
use facetrack_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Runtime settings, layered: defaults < TOML file < `FACETRACK_*` env < flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// YOLOv5-face model, relative to `model_dir` unless absolute.
    pub detector_model: PathBuf,
    /// Recognition model, relative to `model_dir` unless absolute.
    pub extractor_model: PathBuf,
    pub min_confidence: f32,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Minimum interval between detection passes when tracking.
    pub detection_frequency_ms: i64,
    /// Detector localisation noise fed to the tracker, 0..=1.
    pub measurement_noise: f32,
    /// Frames are resized by this factor before processing.
    pub input_scale: f64,
    /// Playback rate assumed for image sequences.
    pub sequence_fps: f64,
    /// V4L2 device used when no input is given.
    pub camera_device: String,
}

impl Default for Config {
    fn default() -> Self {
        let pipeline = PipelineConfig::default();
        Self {
            model_dir: PathBuf::from("models"),
            detector_model: PathBuf::from("yolov5s-face.onnx"),
            extractor_model: PathBuf::from("adaface_ir18_vgg2.onnx"),
            min_confidence: pipeline.min_confidence,
            similarity_threshold: pipeline.similarity_threshold,
            detection_frequency_ms: pipeline.detection_frequency_ms,
            measurement_noise: pipeline.measurement_noise,
            input_scale: 1.0,
            sequence_fps: 30.0,
            camera_device: "/dev/video0".to_string(),
        }
    }
}

/// Command-line overrides, highest precedence.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Directory containing the ONNX models
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,
    /// Minimal detection confidence
    #[arg(long, global = true)]
    pub min_confidence: Option<f32>,
    /// Minimal similarity for a match
    #[arg(long, global = true)]
    pub similarity_threshold: Option<f32>,
    /// Detection interval in milliseconds (0 = every frame, negative = never)
    #[arg(long, global = true, allow_negative_numbers = true)]
    pub detection_frequency_ms: Option<i64>,
    /// Tracker measurement noise
    #[arg(long, global = true)]
    pub measurement_noise: Option<f32>,
    /// Input resolution scale
    #[arg(long, global = true)]
    pub input_scale: Option<f64>,
    /// Frame rate assumed for image sequences
    #[arg(long, global = true)]
    pub sequence_fps: Option<f64>,
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

impl Config {
    /// Defaults, overlaid with `path` if given, then with the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay `FACETRACK_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACETRACK_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = parsed(&lookup, "FACETRACK_MIN_CONFIDENCE") {
            self.min_confidence = v;
        }
        if let Some(v) = parsed(&lookup, "FACETRACK_SIMILARITY_THRESHOLD") {
            self.similarity_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "FACETRACK_DETECTION_FREQUENCY_MS") {
            self.detection_frequency_ms = v;
        }
        if let Some(v) = parsed(&lookup, "FACETRACK_MEASUREMENT_NOISE") {
            self.measurement_noise = v;
        }
        if let Some(v) = parsed(&lookup, "FACETRACK_INPUT_SCALE") {
            self.input_scale = v;
        }
        if let Some(v) = parsed(&lookup, "FACETRACK_SEQUENCE_FPS") {
            self.sequence_fps = v;
        }
        if let Some(v) = lookup("FACETRACK_CAMERA_DEVICE") {
            self.camera_device = v;
        }
    }

    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(v) = &o.model_dir {
            self.model_dir = v.clone();
        }
        if let Some(v) = o.min_confidence {
            self.min_confidence = v;
        }
        if let Some(v) = o.similarity_threshold {
            self.similarity_threshold = v;
        }
        if let Some(v) = o.detection_frequency_ms {
            self.detection_frequency_ms = v;
        }
        if let Some(v) = o.measurement_noise {
            self.measurement_noise = v;
        }
        if let Some(v) = o.input_scale {
            self.input_scale = v;
        }
        if let Some(v) = o.sequence_fps {
            self.sequence_fps = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.input_scale.is_finite() && self.input_scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "input_scale must be positive, got {}",
                self.input_scale
            )));
        }
        if !(self.sequence_fps.is_finite() && self.sequence_fps > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sequence_fps must be positive, got {}",
                self.sequence_fps
            )));
        }
        if !self.similarity_threshold.is_finite() || !self.min_confidence.is_finite() {
            return Err(ConfigError::Invalid(
                "thresholds must be finite numbers".into(),
            ));
        }
        Ok(())
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn extractor_path(&self) -> PathBuf {
        self.model_dir.join(&self.extractor_model)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            min_confidence: self.min_confidence,
            similarity_threshold: self.similarity_threshold,
            detection_frequency_ms: self.detection_frequency_ms,
            measurement_noise: self.measurement_noise,
        }
    }
}

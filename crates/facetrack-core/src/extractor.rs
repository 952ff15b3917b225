//! Face embedding extraction via ONNX Runtime.
//!
//! The face crop is resized to 112x112 with a cubic filter, mapped to
//! [-1, 1] and fed in BGR channel order, which is what AdaFace/ArcFace
//! style recognition models are trained on.

use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EXTRACTOR_INPUT_SIZE: u32 = 112;
const EXTRACTOR_MEAN: f32 = 127.5;
const EXTRACTOR_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("cannot extract an embedding from an empty image")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that turns a cropped face into a fixed-length embedding.
pub trait Extractor {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractorError>;
}

/// Recognition network loaded from an ONNX file.
pub struct OnnxFaceExtractor {
    session: Session,
}

impl OnnxFaceExtractor {
    pub fn load(model_path: &Path) -> Result<Self, ExtractorError> {
        if !model_path.exists() {
            return Err(ExtractorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face recognition model"
        );

        Ok(Self { session })
    }
}

impl Extractor for OnnxFaceExtractor {
    fn extract(&mut self, face: &RgbImage) -> Result<Embedding, ExtractorError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(ExtractorError::EmptyImage);
        }

        let input = preprocess(face);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // Some exports return (embedding, norm); the embedding is always first.
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ExtractorError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.is_empty() {
            return Err(ExtractorError::InferenceFailed(
                "model produced an empty embedding".into(),
            ));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Resize to the network input and pack as NCHW BGR in [-1, 1].
fn preprocess(face: &RgbImage) -> Array4<f32> {
    let size = EXTRACTOR_INPUT_SIZE as usize;
    let resized = imageops::resize(
        face,
        EXTRACTOR_INPUT_SIZE,
        EXTRACTOR_INPUT_SIZE,
        FilterType::CatmullRom,
    );

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            // RGB -> BGR
            tensor[[0, 2 - c, y, x]] = (f32::from(pixel[c]) - EXTRACTOR_MEAN) / EXTRACTOR_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

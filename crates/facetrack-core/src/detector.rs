//! Face detection: the [`Detector`] seam and a YOLOv5-face implementation
//! running on ONNX Runtime.
//!
//! The network sees the frame stretched to 640x640 RGB scaled to [0, 1] and
//! emits one 16-value cell per anchor:
//! `[cx, cy, w, h, objectness, x1, y1, ..., x5, y5, face_score]`.

use crate::types::{BoundingBox, Detection, Landmarks};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const YOLO_INPUT_SIZE: u32 = 640;
const YOLO_PIXEL_SCALE: f32 = 1.0 / 255.0;
const YOLO_CELL_LEN: usize = 16;
const YOLO_NMS_THRESHOLD: f32 = 0.25;

/// Confidence floor used when the caller has no preference.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("cannot detect faces in an empty image")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that finds faces in a frame.
///
/// Results are ordered by descending confidence; single-face consumers take
/// the first element.
pub trait Detector {
    fn detect(
        &mut self,
        frame: &RgbImage,
        min_confidence: f32,
    ) -> Result<Vec<Detection>, DetectorError>;
}

/// YOLOv5-face detector.
pub struct YoloFaceDetector {
    session: Session,
}

impl YoloFaceDetector {
    /// Load the YOLOv5-face ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
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
            "loaded YOLOv5-face model"
        );

        Ok(Self { session })
    }
}

impl Detector for YoloFaceDetector {
    fn detect(
        &mut self,
        frame: &RgbImage,
        min_confidence: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let input = preprocess(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, cells) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detections: {e}")))?;

        if shape.len() != 3 || shape[2] as usize != YOLO_CELL_LEN {
            return Err(DetectorError::InferenceFailed(format!(
                "expected [1, N, {YOLO_CELL_LEN}] output, got {shape:?}"
            )));
        }

        let candidates = decode_cells(cells, frame.width(), frame.height(), min_confidence);
        let result = nms(candidates, YOLO_NMS_THRESHOLD);
        tracing::trace!(faces = result.len(), "detection pass");
        Ok(result)
    }
}

/// Stretch-resize to the network input and pack as NCHW RGB in [0, 1].
fn preprocess(frame: &RgbImage) -> Array4<f32> {
    let size = YOLO_INPUT_SIZE as usize;
    let resized = imageops::resize(frame, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            tensor[[0, c, y, x]] = f32::from(pixel[c]) * YOLO_PIXEL_SCALE;
        }
    }
    tensor
}

/// Turn raw network cells into frame-space detections above `min_confidence`.
///
/// Both the objectness and the combined `objectness * face_score` must clear
/// the threshold. Boxes are clipped to the frame.
fn decode_cells(cells: &[f32], width: u32, height: u32, min_confidence: f32) -> Vec<Detection> {
    let scale_x = width as f32 / YOLO_INPUT_SIZE as f32;
    let scale_y = height as f32 / YOLO_INPUT_SIZE as f32;
    let frame_rect = BoundingBox::scene(width, height);

    cells
        .chunks_exact(YOLO_CELL_LEN)
        .filter_map(|cell| {
            let objectness = cell[4];
            if objectness < min_confidence {
                return None;
            }
            let confidence = objectness * cell[15];
            if confidence < min_confidence {
                return None;
            }

            let w = (cell[2] * scale_x) as i32;
            let h = (cell[3] * scale_y) as i32;
            let x = (cell[0] * scale_x - 0.5 * w as f32) as i32;
            let y = (cell[1] * scale_y - 0.5 * h as f32) as i32;
            let bounding_box = BoundingBox::new(x, y, w, h).intersect(&frame_rect);

            let mut landmarks: Landmarks = [0; 10];
            for (k, lm) in landmarks.iter_mut().enumerate() {
                let scale = if k % 2 == 0 { scale_x } else { scale_y };
                *lm = (cell[5 + k] * scale) as i32;
            }

            Some(Detection {
                bounding_box,
                landmarks,
                confidence,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output sorted by descending confidence.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        if det.bounding_box.is_empty() {
            continue;
        }
        let suppressed = keep
            .iter()
            .any(|k| k.bounding_box.iou(&det.bounding_box) > iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(cx: f32, cy: f32, w: f32, h: f32, obj: f32, face: f32) -> [f32; YOLO_CELL_LEN] {
        let mut c = [0.0f32; YOLO_CELL_LEN];
        c[..5].copy_from_slice(&[cx, cy, w, h, obj]);
        for k in 0..10 {
            c[5 + k] = 100.0 + k as f32;
        }
        c[15] = face;
        c
    }

    fn det(x: i32, y: i32, w: i32, h: i32, confidence: f32) -> Detection {
        Detection {
            bounding_box: BoundingBox::new(x, y, w, h),
            landmarks: [0; 10],
            confidence,
        }
    }

    #[test]
    fn test_decode_scales_to_frame() {
        // 1280x320 frame: x scale 2.0, y scale 0.5
        let cells = cell(320.0, 320.0, 100.0, 100.0, 0.9, 1.0);
        let dets = decode_cells(&cells, 1280, 320, 0.5);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bounding_box, BoundingBox::new(540, 135, 200, 50));
        assert_eq!(dets[0].landmarks[0], 200);
        assert_eq!(dets[0].landmarks[1], 50);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_filters_on_objectness_and_combined_score() {
        let mut cells = Vec::new();
        cells.extend_from_slice(&cell(100.0, 100.0, 50.0, 50.0, 0.2, 1.0)); // low objectness
        cells.extend_from_slice(&cell(100.0, 100.0, 50.0, 50.0, 0.6, 0.5)); // 0.3 combined
        cells.extend_from_slice(&cell(300.0, 300.0, 50.0, 50.0, 0.8, 0.9)); // 0.72 combined
        let dets = decode_cells(&cells, 640, 640, 0.45);
        assert_eq!(dets.len(), 1);
        assert!((dets[0].confidence - 0.72).abs() < 1e-6);
    }

    #[test]
    fn test_decode_clips_to_frame() {
        let cells = cell(10.0, 10.0, 60.0, 60.0, 0.9, 1.0);
        let dets = decode_cells(&cells, 640, 640, 0.5);
        assert_eq!(dets[0].bounding_box, BoundingBox::new(0, 0, 40, 40));
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let result = nms(
            vec![
                det(5, 5, 100, 100, 0.8),
                det(0, 0, 100, 100, 0.9),
                det(300, 300, 50, 50, 0.7),
            ],
            0.25,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_drops_empty_boxes() {
        let result = nms(vec![det(0, 0, 0, 10, 0.9), det(20, 20, 10, 10, 0.5)], 0.25);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].bounding_box, BoundingBox::new(20, 20, 10, 10));
    }

    #[test]
    fn test_preprocess_shape_and_scale() {
        let frame = RgbImage::from_pixel(32, 16, image::Rgb([255, 0, 51]));
        let tensor = preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // one intensity level of slack for filter rounding
        assert!((tensor[[0, 0, 100, 100]] - 1.0).abs() < 0.005);
        assert!(tensor[[0, 1, 100, 100]].abs() < 0.005);
        assert!((tensor[[0, 2, 100, 100]] - 0.2).abs() < 0.005);
    }

    #[test]
    fn test_load_missing_model() {
        let err = YoloFaceDetector::load(Path::new("/nonexistent/yolov5s-face.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}

//! Render sinks: where per-frame results go.

use facetrack_core::types::{BoundingBox, Landmarks};
use facetrack_core::{FrameReport, RenderSink};
use image::{Rgb, RgbImage};
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DETECTED_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const COASTING_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const KNOWN_COLOR: Rgb<u8> = Rgb([0, 255, 50]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LINE_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// One JSON object per frame, newline-delimited.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> RenderSink for JsonLinesSink<W> {
    type Error = SinkError;

    fn render(
        &mut self,
        report: &FrameReport,
        _frame: &RgbImage,
    ) -> Result<ControlFlow<()>, SinkError> {
        let line = serde_json::to_string(report)?;
        match writeln!(self.writer, "{line}").and_then(|()| self.writer.flush()) {
            Ok(()) => Ok(ControlFlow::Continue(())),
            // reader went away, e.g. `| head`
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(ControlFlow::Break(())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Writes every frame as an annotated PNG into a directory.
///
/// The tracked box is green on frames where detection ran and blue while
/// coasting; landmarks are green for identified faces, red otherwise.
pub struct SnapshotSink {
    dir: PathBuf,
}

impl SnapshotSink {
    pub fn create(dir: &Path) -> Result<Self, SinkError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.png"))
    }
}

impl RenderSink for SnapshotSink {
    type Error = SinkError;

    fn render(
        &mut self,
        report: &FrameReport,
        frame: &RgbImage,
    ) -> Result<ControlFlow<()>, SinkError> {
        let mut canvas = frame.clone();
        let box_color = if report.detection_fired {
            DETECTED_COLOR
        } else {
            COASTING_COLOR
        };
        for face in &report.faces {
            draw_rect(&mut canvas, &face.bounding_box, box_color);
            if let Some(landmarks) = &face.landmarks {
                let color = if face.name_id >= 0 {
                    KNOWN_COLOR
                } else {
                    UNKNOWN_COLOR
                };
                draw_landmarks(&mut canvas, landmarks, color);
            }
        }
        canvas.save(self.frame_path(report.index))?;
        Ok(ControlFlow::Continue(()))
    }
}

fn put(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rect(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    if bbox.is_empty() {
        return;
    }
    for t in 0..LINE_THICKNESS {
        let (left, top) = (bbox.x + t, bbox.y + t);
        let (right, bottom) = (bbox.right() - 1 - t, bbox.bottom() - 1 - t);
        for x in left..=right {
            put(img, x, top, color);
            put(img, x, bottom, color);
        }
        for y in top..=bottom {
            put(img, left, y, color);
            put(img, right, y, color);
        }
    }
}

fn draw_landmarks(img: &mut RgbImage, landmarks: &Landmarks, color: Rgb<u8>) {
    for point in landmarks.chunks_exact(2) {
        for dy in -1..=1 {
            for dx in -1..=1 {
                put(img, point[0] + dx, point[1] + dy, color);
            }
        }
    }
}

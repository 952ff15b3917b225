//! facetrack-hw — frame acquisition.
//!
//! Every input, a V4L2 camera or a directory of stills, is a [`FrameSource`]
//! yielding RGB frames.

pub mod camera;
pub mod frame;
pub mod sequence;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::FrameError;
pub use sequence::{ImageSequence, SequenceError};

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("image sequence: {0}")]
    Sequence(#[from] SequenceError),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

/// A stream of RGB frames.
pub trait FrameSource {
    /// Next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// Nominal frame rate, if the source knows it.
    fn fps(&self) -> Option<f64>;
}

/// Iterator over the remaining frames of a source.
pub struct Frames<'a> {
    source: &'a mut dyn FrameSource,
}

impl Iterator for Frames<'_> {
    type Item = Result<RgbImage, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.source.next_frame().transpose()
    }
}

pub fn frames(source: &mut dyn FrameSource) -> Frames<'_> {
    Frames { source }
}

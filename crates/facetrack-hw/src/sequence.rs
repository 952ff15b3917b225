//! A directory of still images played back as a video stream.

use crate::{FrameSource, SourceError};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("cannot read {path}: {source}")]
    ReadDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no images in {0}")]
    Empty(String),
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Image files of one directory in file-name order, at a nominal frame rate.
#[derive(Debug)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    position: usize,
    fps: f64,
}

impl ImageSequence {
    pub fn open(dir: &Path, fps: f64) -> Result<Self, SequenceError> {
        let read_err = |source| SequenceError::ReadDir {
            path: dir.display().to_string(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)));
            if is_image && path.is_file() {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(SequenceError::Empty(dir.display().to_string()));
        }
        paths.sort();

        tracing::info!(dir = %dir.display(), frames = paths.len(), fps, "opened image sequence");
        Ok(Self {
            paths,
            position: 0,
            fps,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let Some(path) = self.paths.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let image = image::open(path).map_err(|source| SequenceError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(image.to_rgb8()))
    }

    fn fps(&self) -> Option<f64> {
        Some(self.fps)
    }
}

//! Build a gallery from a directory of labelled photos.
//!
//! Layout: `<root>/<person>/<photo>.{png,jpg,jpeg}`. Every photo contributes
//! the embedding of its first detected face; a person's gallery entry is the
//! mean of those embeddings.

use crate::detector::Detector;
use crate::extractor::Extractor;
use crate::gallery::Gallery;
use crate::pipeline::crop;
use crate::similarity::{average_embedding, SimilarityError};
use crate::types::Embedding;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PHOTO_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("cannot read {path}: {source}")]
    ReadDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot average embeddings of {name}: {source}")]
    Average {
        name: String,
        #[source]
        source: SimilarityError,
    },
}

pub fn is_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| PHOTO_EXTENSIONS.iter().any(|p| e.eq_ignore_ascii_case(p)))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, EnrollError> {
    let read_err = |source| EnrollError::ReadDir {
        path: dir.display().to_string(),
        source,
    };
    let mut paths = std::fs::read_dir(dir)
        .map_err(read_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    paths.sort();
    Ok(paths)
}

/// Embedding of the first face in one photo, or `None` (logged) when the
/// photo cannot contribute.
fn embed_photo(
    path: &Path,
    detector: &mut impl Detector,
    extractor: &mut impl Extractor,
    min_confidence: f32,
) -> Option<Embedding> {
    let frame = match image::open(path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping undecodable photo");
            return None;
        }
    };

    let detection = match detector.detect(&frame, min_confidence) {
        Ok(dets) => dets.into_iter().next(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "detection failed");
            return None;
        }
    };
    let Some(face) = detection.and_then(|d| crop(&frame, &d.bounding_box)) else {
        tracing::warn!(path = %path.display(), "no face found");
        return None;
    };

    match extractor.extract(&face) {
        Ok(embedding) if !embedding.is_empty() => Some(embedding),
        Ok(_) => {
            tracing::warn!(path = %path.display(), "extractor returned an empty embedding");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "extraction failed");
            None
        }
    }
}

/// Walk `root` and return one averaged entry per person with usable photos.
///
/// Person directories are visited in name order, so ids are reproducible.
pub fn collect_gallery(
    root: &Path,
    detector: &mut impl Detector,
    extractor: &mut impl Extractor,
    min_confidence: f32,
) -> Result<Gallery, EnrollError> {
    let mut gallery = Gallery::new();

    for person_dir in sorted_entries(root)? {
        if !person_dir.is_dir() {
            continue;
        }
        let name = person_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let embeddings: Vec<Embedding> = sorted_entries(&person_dir)?
            .iter()
            .filter(|p| p.is_file() && is_photo(p))
            .filter_map(|p| embed_photo(p, &mut *detector, &mut *extractor, min_confidence))
            .collect();

        if embeddings.is_empty() {
            tracing::warn!(person = %name, "no usable photos, skipping");
            continue;
        }

        let mean = average_embedding(&embeddings).map_err(|source| EnrollError::Average {
            name: name.clone(),
            source,
        })?;
        tracing::info!(person = %name, photos = embeddings.len(), "collected");
        gallery.push(name, mean);
    }

    Ok(gallery)
}

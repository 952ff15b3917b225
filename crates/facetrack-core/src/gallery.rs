//! Named embedding gallery and its JSON file format.
//!
//! On disk the gallery is one JSON object: a `"Names"` array fixing the
//! order (and therefore the numeric ids) plus one numeric array per name.
//!
//! ```json
//! { "Names": ["alice", "bob"], "alice": [0.1, ...], "bob": [0.3, ...] }
//! ```

use crate::similarity::{self, SimilarityError};
use crate::types::{Embedding, Identity};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

pub const NAMES_KEY: &str = "Names";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gallery has no \"Names\" array of strings")]
    MalformedNames,
    #[error("gallery lists \"{0}\" but holds no numeric array for it")]
    MissingEmbedding(String),
    #[error("\"{0}\" appears more than once; the file keys embeddings by name")]
    DuplicateName(String),
    #[error("a person cannot be named \"Names\"")]
    ReservedName,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// Ordered set of known identities. Position is the identity key.
///
/// Read-only once a recognition run starts; share it behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    names: Vec<String>,
    embeddings: Vec<Embedding>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = GalleryEntry>) -> Self {
        let mut gallery = Self::new();
        for entry in entries {
            gallery.push(entry.name, entry.embedding);
        }
        gallery
    }

    /// Append an identity; its id is the previous length.
    pub fn push(&mut self, name: impl Into<String>, embedding: Embedding) -> usize {
        self.names.push(name.into());
        self.embeddings.push(embedding);
        self.names.len() - 1
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    /// Best match for `query`, accepted only if its similarity reaches `threshold`.
    ///
    /// Rejected lookups still report the best similarity found.
    pub fn identify(&self, query: &Embedding, threshold: f32) -> Result<Identity, SimilarityError> {
        let (best_id, best_sim) = similarity::search_most_similar(&self.embeddings, query)?;
        if best_sim >= threshold {
            Ok(Identity {
                name_id: best_id as i32,
                name: self.names[best_id].clone(),
                similarity: best_sim,
            })
        } else {
            Ok(Identity::unknown(best_sim))
        }
    }

    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let text = std::fs::read_to_string(path)?;
        let gallery = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), persons = gallery.len(), "loaded gallery");
        Ok(gallery)
    }

    pub fn from_json(text: &str) -> Result<Self, GalleryError> {
        let root: Map<String, Value> = serde_json::from_str(text)?;

        let names = root
            .get(NAMES_KEY)
            .and_then(Value::as_array)
            .ok_or(GalleryError::MalformedNames)?;

        let mut gallery = Self::new();
        for name in names {
            let name = name.as_str().ok_or(GalleryError::MalformedNames)?;
            let embedding = root
                .get(name)
                .and_then(Value::as_array)
                .and_then(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().map(|f| f as f32))
                        .collect::<Option<Vec<f32>>>()
                })
                .ok_or_else(|| GalleryError::MissingEmbedding(name.to_string()))?;
            gallery.push(name, Embedding::new(embedding));
        }
        Ok(gallery)
    }

    /// Serialise to the on-disk format.
    ///
    /// Fails on repeated names and on a person named `"Names"`, neither of
    /// which the format can represent.
    pub fn to_json(&self) -> Result<String, GalleryError> {
        let mut seen = HashSet::new();
        for name in &self.names {
            if name == NAMES_KEY {
                return Err(GalleryError::ReservedName);
            }
            if !seen.insert(name.as_str()) {
                return Err(GalleryError::DuplicateName(name.clone()));
            }
        }

        let mut root = Map::new();
        for (name, embedding) in self.names.iter().zip(&self.embeddings) {
            root.insert(name.clone(), serde_json::to_value(embedding)?);
        }
        // An empty gallery carries no name list, mirroring the collector.
        if !self.names.is_empty() {
            root.insert(NAMES_KEY.to_string(), serde_json::to_value(&self.names)?);
        }
        Ok(serde_json::to_string_pretty(&Value::Object(root))?)
    }

    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(path = %path.display(), persons = self.len(), "saved gallery");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_person_gallery() -> Gallery {
        let mut g = Gallery::new();
        g.push("alice", Embedding::new(vec![1.0, 0.0, 0.0]));
        g.push("bob", Embedding::new(vec![0.0, 1.0, 0.0]));
        g
    }

    #[test]
    fn test_identify_accepts_exact_match() {
        let id = two_person_gallery()
            .identify(&Embedding::new(vec![1.0, 0.0, 0.0]), 0.25)
            .unwrap();
        assert_eq!(id.name_id, 0);
        assert_eq!(id.name, "alice");
        assert_relative_eq!(id.similarity, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_identify_rejects_below_threshold() {
        let id = two_person_gallery()
            .identify(&Embedding::new(vec![0.0, 0.0, 1.0]), 0.25)
            .unwrap();
        assert_eq!(id, Identity::unknown(0.0));
    }

    #[test]
    fn test_identify_threshold_is_inclusive() {
        let g = two_person_gallery();
        let query = Embedding::new(vec![0.0, 1.0, 0.0]);
        let sim = g.embeddings()[1].similarity(&query).unwrap();
        assert_eq!(g.identify(&query, sim).unwrap().name_id, 1);
    }

    #[test]
    fn test_identify_empty_gallery_fails() {
        assert_eq!(
            Gallery::new().identify(&Embedding::new(vec![1.0]), 0.0),
            Err(SimilarityError::EmptyGallery)
        );
    }

    #[test]
    fn test_json_roundtrip_preserves_order() {
        let mut g = Gallery::new();
        g.push("zoe", Embedding::new(vec![0.5, -0.25]));
        g.push("adam", Embedding::new(vec![1.0, 2.0]));
        let back = Gallery::from_json(&g.to_json().unwrap()).unwrap();
        assert_eq!(back, g);
        assert_eq!(back.name(0), Some("zoe"));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persons.json");
        let g = two_person_gallery();
        g.save(&path).unwrap();
        assert_eq!(Gallery::load(&path).unwrap(), g);
    }

    #[test]
    fn test_duplicate_names_are_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persons.json");
        let mut g = Gallery::new();
        g.push("alice", Embedding::new(vec![1.0, 0.0]));
        g.push("alice", Embedding::new(vec![0.0, 1.0]));
        assert_eq!(g.identify(&Embedding::new(vec![0.0, 1.0]), 0.5).unwrap().name_id, 1);

        let err = g.save(&path).unwrap_err();
        assert!(matches!(err, GalleryError::DuplicateName(ref n) if n == "alice"));
        assert!(!path.exists());
    }

    #[test]
    fn test_person_named_like_the_name_list_is_rejected() {
        let mut g = two_person_gallery();
        g.push(NAMES_KEY, Embedding::new(vec![0.0, 0.0, 1.0]));
        assert!(matches!(g.to_json().unwrap_err(), GalleryError::ReservedName));
    }

    #[test]
    fn test_names_must_be_an_array() {
        let err = Gallery::from_json(r#"{"Names": "alice", "alice": [1.0]}"#).unwrap_err();
        assert!(matches!(err, GalleryError::MalformedNames));
    }

    #[test]
    fn test_names_required() {
        let err = Gallery::from_json(r#"{"alice": [1.0]}"#).unwrap_err();
        assert!(matches!(err, GalleryError::MalformedNames));
    }

    #[test]
    fn test_empty_gallery_file_cannot_be_loaded() {
        let json = Gallery::new().to_json().unwrap();
        assert!(matches!(
            Gallery::from_json(&json).unwrap_err(),
            GalleryError::MalformedNames
        ));
    }

    #[test]
    fn test_missing_embedding() {
        let err = Gallery::from_json(r#"{"Names": ["alice", "bob"], "alice": [1.0]}"#).unwrap_err();
        assert!(matches!(err, GalleryError::MissingEmbedding(ref n) if n == "bob"));
    }

    #[test]
    fn test_non_numeric_embedding() {
        let err = Gallery::from_json(r#"{"Names": ["alice"], "alice": [1.0, "x"]}"#).unwrap_err();
        assert!(matches!(err, GalleryError::MissingEmbedding(_)));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            Gallery::from_json("not json").unwrap_err(),
            GalleryError::Json(_)
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Gallery::load(Path::new("/nonexistent/persons.json")).unwrap_err(),
            GalleryError::Io(_)
        ));
    }
}

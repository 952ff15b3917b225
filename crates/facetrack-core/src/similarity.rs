//! Nearest-neighbour lookup over embedding vectors.

use crate::types::Embedding;
use thiserror::Error;

/// Added to the norm product so zero vectors yield 0.0 instead of NaN.
pub const SIMILARITY_EPSILON: f64 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embedding dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("gallery is empty")]
    EmptyGallery,
    #[error("query embedding is empty")]
    EmptyQuery,
    #[error("no embeddings to average")]
    NothingToAverage,
}

/// Cosine similarity `dot(a, b) / (|a| * |b| + eps)`, roughly in [-1, 1].
///
/// Accumulates in f64 so long (512-d) vectors do not drift.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    Ok((dot / (norm_a.sqrt() * norm_b.sqrt() + SIMILARITY_EPSILON)) as f32)
}

/// Linear scan returning `(index, similarity)` of the most similar entry.
///
/// Only a strictly greater score replaces the current best, so ties resolve
/// to the lowest index. No threshold is applied here.
pub fn search_most_similar(
    gallery: &[Embedding],
    query: &Embedding,
) -> Result<(usize, f32), SimilarityError> {
    if gallery.is_empty() {
        return Err(SimilarityError::EmptyGallery);
    }
    if query.is_empty() {
        return Err(SimilarityError::EmptyQuery);
    }

    let mut best_idx = 0usize;
    let mut best_sim = f32::NEG_INFINITY;
    for (i, candidate) in gallery.iter().enumerate() {
        let sim = cosine_similarity(&candidate.values, &query.values)?;
        if sim > best_sim {
            best_sim = sim;
            best_idx = i;
        }
    }

    Ok((best_idx, best_sim))
}

/// Element-wise mean of equally sized embeddings.
pub fn average_embedding(embeddings: &[Embedding]) -> Result<Embedding, SimilarityError> {
    let (first, rest) = embeddings
        .split_first()
        .ok_or(SimilarityError::NothingToAverage)?;
    if rest.is_empty() {
        return Ok(first.clone());
    }

    let dim = first.len();
    let mut sum = vec![0.0f64; dim];
    for embedding in embeddings {
        if embedding.len() != dim {
            return Err(SimilarityError::DimensionMismatch {
                left: dim,
                right: embedding.len(),
            });
        }
        for (acc, &v) in sum.iter_mut().zip(&embedding.values) {
            *acc += f64::from(v);
        }
    }

    let n = embeddings.len() as f64;
    Ok(Embedding::new(
        sum.into_iter().map(|v| (v / n) as f32).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rstest::rstest;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[rstest]
    #[case(&[1.0, 0.0, 0.0])]
    #[case(&[0.3, -2.5, 7.0, 0.01])]
    #[case(&[10.0, -3.0])]
    fn test_self_similarity_is_one(#[case] a: &[f32]) {
        let sim = cosine_similarity(a, a).unwrap();
        assert_abs_diff_eq!(sim, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = [0.2, 0.9, -0.4, 1.5];
        let b = [-1.0, 0.3, 0.3, 0.8];
        assert_eq!(
            cosine_similarity(&a, &b).unwrap(),
            cosine_similarity(&b, &a).unwrap()
        );
    }

    #[test]
    fn test_similarity_orthogonal_and_opposite() {
        assert_abs_diff_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap(), 0.0);
        assert_abs_diff_eq!(
            cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]).unwrap(),
            -1.0,
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_similarity_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_similarity_dimension_mismatch() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0]).unwrap_err();
        assert_eq!(err, SimilarityError::DimensionMismatch { left: 2, right: 1 });
    }

    #[test]
    fn test_search_finds_exact_match() {
        let gallery = vec![emb(&[0.0, 1.0, 0.0]), emb(&[0.0, 0.0, 1.0]), emb(&[1.0, 0.0, 0.0])];
        let (idx, sim) = search_most_similar(&gallery, &emb(&[1.0, 0.0, 0.0])).unwrap();
        assert_eq!(idx, 2);
        assert_relative_eq!(sim, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_search_ties_resolve_to_first() {
        let gallery = vec![emb(&[0.0, 1.0]), emb(&[1.0, 0.0]), emb(&[1.0, 0.0])];
        let (idx, _) = search_most_similar(&gallery, &emb(&[1.0, 0.0])).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_search_reports_negative_best() {
        let gallery = vec![emb(&[-1.0, 0.0])];
        let (idx, sim) = search_most_similar(&gallery, &emb(&[1.0, 0.0])).unwrap();
        assert_eq!(idx, 0);
        assert!(sim < -0.99);
    }

    #[test]
    fn test_search_empty_inputs() {
        assert_eq!(
            search_most_similar(&[], &emb(&[1.0])).unwrap_err(),
            SimilarityError::EmptyGallery
        );
        assert_eq!(
            search_most_similar(&[emb(&[1.0])], &emb(&[])).unwrap_err(),
            SimilarityError::EmptyQuery
        );
    }

    #[test]
    fn test_search_propagates_dimension_mismatch() {
        let gallery = vec![emb(&[1.0, 0.0])];
        assert!(matches!(
            search_most_similar(&gallery, &emb(&[1.0, 0.0, 0.0])),
            Err(SimilarityError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_average_of_copies_is_unchanged() {
        let v = emb(&[0.25, -0.5, 3.0]);
        let avg = average_embedding(&[v.clone(), v.clone(), v.clone()]).unwrap();
        assert_eq!(avg, v);
    }

    #[test]
    fn test_average_single_is_identity() {
        let v = emb(&[1.0, 2.0]);
        assert_eq!(average_embedding(std::slice::from_ref(&v)).unwrap(), v);
    }

    #[test]
    fn test_average_element_wise_mean() {
        let avg = average_embedding(&[emb(&[1.0, 0.0]), emb(&[3.0, 4.0])]).unwrap();
        assert_eq!(avg.values, vec![2.0, 2.0]);
    }

    #[test]
    fn test_average_errors() {
        assert_eq!(
            average_embedding(&[]).unwrap_err(),
            SimilarityError::NothingToAverage
        );
        assert!(average_embedding(&[emb(&[1.0]), emb(&[1.0, 2.0])]).is_err());
    }
}

use serde::{Deserialize, Serialize};

use crate::similarity::{self, SimilarityError};

/// Label attached to faces that no gallery entry accepted.
pub const UNKNOWN_NAME: &str = "unknown";

/// Identity index used when no gallery entry accepted the face.
pub const UNKNOWN_ID: i32 = -1;

/// Axis-aligned integer rectangle in frame pixel coordinates.
///
/// A box with non-positive width or height is *empty*; the tracker uses the
/// empty box to mean "no measurement this frame".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub const EMPTY: BoundingBox = BoundingBox {
        x: 0,
        y: 0,
        width: 0,
        height: 0,
    };

    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle covering a whole `width` x `height` frame.
    pub fn scene(width: u32, height: u32) -> Self {
        Self::new(
            0,
            0,
            i32::try_from(width).unwrap_or(i32::MAX),
            i32::try_from(height).unwrap_or(i32::MAX),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            i64::from(self.width) * i64::from(self.height)
        }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// Intersection of two boxes; [`BoundingBox::EMPTY`] when they do not overlap.
    pub fn intersect(&self, other: &BoundingBox) -> BoundingBox {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x2 <= x1 || y2 <= y1 {
            return BoundingBox::EMPTY;
        }
        BoundingBox::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Intersection-over-Union, 0.0 for disjoint or empty boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersect(other).area() as f32;
        if inter == 0.0 {
            return 0.0;
        }
        let union = (self.area() + other.area()) as f32 - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Five facial landmarks flattened as `[x0, y0, x1, y1, ...]`:
/// left eye, right eye, nose, left mouth corner, right mouth corner.
pub type Landmarks = [i32; 10];

/// One face found by a [`Detector`](crate::detector::Detector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub landmarks: Landmarks,
    pub confidence: f32,
}

/// Face embedding vector produced by an [`Extractor`](crate::extractor::Extractor).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Cosine similarity against another embedding of the same dimension.
    pub fn similarity(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        similarity::cosine_similarity(&self.values, &other.values)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Outcome of looking an embedding up in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Gallery index of the accepted entry, or [`UNKNOWN_ID`].
    pub name_id: i32,
    pub name: String,
    /// Best cosine similarity found (reported even when rejected).
    pub similarity: f32,
}

impl Identity {
    pub fn unknown(similarity: f32) -> Self {
        Self {
            name_id: UNKNOWN_ID,
            name: UNKNOWN_NAME.to_string(),
            similarity,
        }
    }

    pub fn is_known(&self) -> bool {
        self.name_id != UNKNOWN_ID
    }
}

/// Result record handed to the render sink for every face of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub bounding_box: BoundingBox,
    pub landmarks: Option<Landmarks>,
    pub confidence: f32,
    pub name_id: i32,
    pub name: String,
    pub similarity: f32,
}

impl Face {
    pub fn new(
        bounding_box: BoundingBox,
        landmarks: Option<Landmarks>,
        confidence: f32,
        identity: Identity,
    ) -> Self {
        Self {
            bounding_box,
            landmarks,
            confidence,
            name_id: identity.name_id,
            name: identity.name,
            similarity: identity.similarity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    #[rstest]
    #[case(BoundingBox::new(0, 0, 0, 10), true)]
    #[case(BoundingBox::new(0, 0, 10, 0), true)]
    #[case(BoundingBox::new(5, 5, -3, 10), true)]
    #[case(BoundingBox::new(0, 0, 1, 1), false)]
    fn test_is_empty(#[case] b: BoundingBox, #[case] expected: bool) {
        assert_eq!(b.is_empty(), expected);
    }

    #[test]
    fn test_intersect_partial() {
        let a = BoundingBox::new(0, 0, 100, 100);
        let b = BoundingBox::new(50, 25, 100, 100);
        assert_eq!(a.intersect(&b), BoundingBox::new(50, 25, 50, 75));
    }

    #[test]
    fn test_intersect_disjoint_is_empty() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(10, 0, 10, 10);
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn test_intersect_clamps_to_scene() {
        let scene = BoundingBox::scene(640, 480);
        let b = BoundingBox::new(-20, 400, 100, 100);
        assert_eq!(b.intersect(&scene), BoundingBox::new(0, 400, 80, 80));
    }

    #[test]
    fn test_iou_partial() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 10, 10);
        assert_relative_eq!(a.iou(&b), 50.0 / 150.0);
    }

    #[test]
    fn test_unknown_identity() {
        let id = Identity::unknown(0.1);
        assert_eq!(id.name_id, UNKNOWN_ID);
        assert_eq!(id.name, UNKNOWN_NAME);
        assert!(!id.is_known());
    }

    #[test]
    fn test_embedding_serializes_as_plain_array() {
        let e = Embedding::new(vec![0.5, -1.0]);
        assert_eq!(serde_json::to_string(&e).unwrap(), "[0.5,-1.0]");
    }
}

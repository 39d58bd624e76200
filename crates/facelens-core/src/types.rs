use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Label reported for every face that does not clear the similarity threshold.
pub const NOT_RECOGNIZED: &str = "Not recognized";

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Build a box from two opposite corners given in any order.
    pub fn from_corners(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Face embedding vector. All vectors compared against each other must share
/// the embedder's dimensionality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Returns `None` when either vector has zero magnitude, where the
    /// similarity is undefined.
    ///
    /// # Panics
    ///
    /// Panics if the two vectors differ in length. Mixing embedders is a
    /// wiring bug and must not be papered over by truncation.
    pub fn similarity(&self, other: &Embedding) -> Option<f32> {
        assert_eq!(
            self.values.len(),
            other.values.len(),
            "embedding dimensionality mismatch"
        );

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 && denom.is_finite() {
            Some(dot / denom)
        } else {
            None
        }
    }

    /// Euclidean distance between two embeddings.
    ///
    /// # Panics
    ///
    /// Panics on a dimensionality mismatch, like [`similarity`](Self::similarity).
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        assert_eq!(
            self.values.len(),
            other.values.len(),
            "embedding dimensionality mismatch"
        );
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled face of one person. A person may own several records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_id: i64,
    pub identity_name: String,
    pub embedding: Embedding,
}

/// A face found by the detector, valid only for the frame it came from.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Cropped face region, fed to the embedder.
    pub crop: RgbaImage,
    /// Face rectangle in source-image coordinates.
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Outcome of matching one query embedding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Recognized {
        identity_id: i64,
        identity_name: String,
        similarity: f32,
    },
    NotRecognized,
}

impl Decision {
    pub fn is_recognized(&self) -> bool {
        matches!(self, Decision::Recognized { .. })
    }

    /// Display label: `"<name> <similarity>"` with two decimals, or the
    /// not-recognized sentinel.
    pub fn label(&self) -> String {
        match self {
            Decision::Recognized {
                identity_name,
                similarity,
                ..
            } => format!("{identity_name} {similarity:.2}"),
            Decision::NotRecognized => NOT_RECOGNIZED.to_string(),
        }
    }
}

/// Label and display-space box for one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub label: String,
    pub bbox: BoundingBox,
}

/// Per-frame stage timings. Only produced for frames with at least one face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecognitionMetrics {
    pub detection_time_ms: f64,
    pub avg_embedding_time_ms: f64,
    pub avg_search_time_ms: f64,
}

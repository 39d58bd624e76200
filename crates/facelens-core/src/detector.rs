//! Collaborator contracts for face detection and embedding.
//!
//! Model inference lives outside this crate; anything that can find faces
//! in an image or turn a face crop into a fixed-length vector plugs in here.

use crate::types::{Detection, Embedding};
use async_trait::async_trait;
use image::RgbaImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("no face detected")]
    NoFace,
    #[error("malformed input image: {0}")]
    MalformedInput(String),
    #[error("detection failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding failed: {0}")]
    Failed(String),
}

/// Finds faces in an upright image.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Detect every face in `image`.
    ///
    /// An image without faces yields an empty list, not an error. Errors are
    /// reserved for input the detector cannot read.
    async fn detect(&self, image: &RgbaImage) -> Result<Vec<Detection>, DetectorError>;

    /// Detect exactly one face, for enrollment.
    ///
    /// The default picks the most confident detection and fails with
    /// [`DetectorError::NoFace`] when there is none.
    async fn detect_single(&self, image: &RgbaImage) -> Result<Detection, DetectorError> {
        self.detect(image)
            .await?
            .into_iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or(DetectorError::NoFace)
    }
}

/// Turns a face crop into an embedding of fixed dimensionality.
///
/// Must be deterministic for identical input.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, crop: &RgbaImage) -> Result<Embedding, EmbedderError>;
}

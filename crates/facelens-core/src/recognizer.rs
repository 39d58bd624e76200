//! Recognition matching engine.
//!
//! Runs detector → embedder → store lookup for a frame and turns each
//! nearest-neighbor candidate into a labelled decision using a cosine
//! similarity threshold.

use crate::config::MatchConfig;
use crate::detector::{DetectorError, EmbedderError, Embedder, FaceDetector};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{
    Decision, Detection, Embedding, IdentityRecord, RecognitionMetrics, RecognitionResult,
};
use image::RgbaImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why an enrollment wrote nothing.
///
/// Upstream failures come in two kinds: no face could be found in the
/// image ([`DetectionFailed`](Self::DetectionFailed)), or a face crop was
/// supplied but the embedder could not use it ([`Embedding`](Self::Embedding)).
#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no usable face in enrollment image: {0}")]
    DetectionFailed(#[source] DetectorError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Labels and timings for one processed image.
///
/// Boxes are still in source-image coordinates; mapping them to display
/// space is the geometry pipeline's job.
#[derive(Debug, Clone, Default)]
pub struct FrameRecognition {
    pub metrics: Option<RecognitionMetrics>,
    pub results: Vec<RecognitionResult>,
}

/// Decide whether `candidate` is close enough to `query` to report it.
///
/// The candidate must strictly exceed `threshold`. An undefined similarity
/// (zero-magnitude vector) is never a match.
pub fn decide(query: &Embedding, candidate: &IdentityRecord, threshold: f32) -> Decision {
    match query.similarity(&candidate.embedding) {
        Some(similarity) if similarity > threshold => Decision::Recognized {
            identity_id: candidate.identity_id,
            identity_name: candidate.identity_name.clone(),
            similarity,
        },
        _ => Decision::NotRecognized,
    }
}

/// Gallery matcher wired to its detector, embedder and store.
pub struct RecognitionEngine {
    detector: Arc<dyn FaceDetector>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn EmbeddingStore>,
    config: MatchConfig,
}

impl RecognitionEngine {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn EmbeddingStore>,
        config: MatchConfig,
    ) -> Self {
        Self {
            detector,
            embedder,
            store,
            config,
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Enroll one already-detected face crop under `identity_id`.
    pub async fn enroll(
        &self,
        identity_id: i64,
        identity_name: &str,
        crop: &RgbaImage,
    ) -> Result<(), EnrollError> {
        let embedding = self.embedder.embed(crop).await?;
        self.store
            .insert(identity_id, identity_name, embedding)
            .await?;
        tracing::info!(identity_id, identity_name, "identity enrolled");
        Ok(())
    }

    /// Detect the single face in `image` and enroll it.
    ///
    /// Any detector failure aborts enrollment as
    /// [`EnrollError::DetectionFailed`] before anything is written.
    pub async fn enroll_image(
        &self,
        identity_id: i64,
        identity_name: &str,
        image: &RgbaImage,
    ) -> Result<(), EnrollError> {
        let face = self
            .detector
            .detect_single(image)
            .await
            .map_err(EnrollError::DetectionFailed)?;
        tracing::debug!(identity_id, confidence = face.confidence, "enroll: face detected");
        self.enroll(identity_id, identity_name, &face.crop).await
    }

    /// Remove every enrollment sample of `identity_id`. Unknown ids are a no-op.
    pub async fn remove_identity(&self, identity_id: i64) -> Result<(), StoreError> {
        let removed = self.store.delete_by_identity(identity_id).await?;
        tracing::info!(identity_id, removed, "identity removed");
        Ok(())
    }

    /// Match one query embedding against the gallery.
    pub async fn recognize(&self, query: &Embedding) -> Result<Decision, StoreError> {
        let candidate = self.store.nearest_neighbor(query).await?;
        Ok(match candidate {
            Some(record) => decide(query, &record, self.config.similarity_threshold),
            None => Decision::NotRecognized,
        })
    }

    /// Detect, embed and recognize every face in an upright image.
    pub async fn recognize_frame(
        &self,
        image: &RgbaImage,
    ) -> Result<FrameRecognition, DetectorError> {
        let start = Instant::now();
        let detections = self.detector.detect(image).await?;
        let detection_time = start.elapsed();
        Ok(self.recognize_detections(detections, detection_time).await)
    }

    /// Label already-detected faces, preserving detector order.
    ///
    /// Every detection yields exactly one result. A failed embed or search
    /// for one face labels that face as not recognized.
    pub async fn recognize_detections(
        &self,
        detections: Vec<Detection>,
        detection_time: Duration,
    ) -> FrameRecognition {
        let mut results = Vec::with_capacity(detections.len());
        let mut embed_total = Duration::ZERO;
        let mut search_total = Duration::ZERO;

        for (index, detection) in detections.iter().enumerate() {
            let t_embed = Instant::now();
            let embedding = self.embedder.embed(&detection.crop).await;
            embed_total += t_embed.elapsed();

            let decision = match embedding {
                Ok(embedding) => {
                    let t_search = Instant::now();
                    let decision = self.recognize(&embedding).await;
                    search_total += t_search.elapsed();
                    decision.unwrap_or_else(|e| {
                        tracing::warn!(index, error = %e, "gallery search failed");
                        Decision::NotRecognized
                    })
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "face embedding failed");
                    Decision::NotRecognized
                }
            };

            results.push(RecognitionResult {
                label: decision.label(),
                bbox: detection.bbox,
            });
        }

        let metrics = if detections.is_empty() {
            None
        } else {
            let n = detections.len() as f64;
            Some(RecognitionMetrics {
                detection_time_ms: millis(detection_time),
                avg_embedding_time_ms: millis(embed_total) / n,
                avg_search_time_ms: millis(search_total) / n,
            })
        };

        tracing::trace!(faces = results.len(), ?metrics, "frame recognized");
        FrameRecognition { metrics, results }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

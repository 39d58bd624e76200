//! facelens-core — Gallery matching for live face recognition.
//!
//! Matches face embeddings against enrolled identities with a cosine
//! similarity threshold. Detection, embedding and storage are collaborators
//! behind the traits in [`detector`] and [`store`].

pub mod config;
pub mod detector;
pub mod recognizer;
pub mod store;
pub mod types;

pub use config::MatchConfig;
pub use detector::{Embedder, FaceDetector};
pub use recognizer::{EnrollError, FrameRecognition, RecognitionEngine};
pub use store::{EmbeddingStore, MemoryStore};
pub use types::{
    BoundingBox, Decision, Detection, Embedding, IdentityRecord, RecognitionMetrics,
    RecognitionResult, NOT_RECOGNIZED,
};

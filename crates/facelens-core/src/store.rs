//! Embedding store contract and an in-memory gallery.

use crate::types::{Embedding, IdentityRecord};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding has {actual} dimensions, store holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("store backend: {0}")]
    Backend(String),
}

/// Storage for enrolled identity records.
///
/// Each call is independent: a query issued concurrently with an insert or
/// delete may or may not observe it.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Persist one record. Calling this repeatedly for the same identity
    /// adds further enrollment samples.
    async fn insert(
        &self,
        identity_id: i64,
        identity_name: &str,
        embedding: Embedding,
    ) -> Result<(), StoreError>;

    /// Single nearest record to `query`, or `None` when the store is empty.
    async fn nearest_neighbor(&self, query: &Embedding)
        -> Result<Option<IdentityRecord>, StoreError>;

    /// Remove every record of `identity_id`. Returns how many were removed;
    /// zero when the identity is unknown.
    async fn delete_by_identity(&self, identity_id: i64) -> Result<usize, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

/// Brute-force gallery held in memory.
///
/// Nearest neighbor is by Euclidean distance; ties go to the record
/// inserted first.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<IdentityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from already-built records.
    pub fn from_records(records: Vec<IdentityRecord>) -> Result<Self, StoreError> {
        if let Some(first) = records.first() {
            let expected = first.embedding.dim();
            if let Some(bad) = records.iter().find(|r| r.embedding.dim() != expected) {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: bad.embedding.dim(),
                });
            }
        }
        Ok(Self {
            records: RwLock::new(records),
        })
    }

    pub async fn records(&self) -> Vec<IdentityRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl EmbeddingStore for MemoryStore {
    async fn insert(
        &self,
        identity_id: i64,
        identity_name: &str,
        embedding: Embedding,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if let Some(first) = records.first() {
            if first.embedding.dim() != embedding.dim() {
                return Err(StoreError::DimensionMismatch {
                    expected: first.embedding.dim(),
                    actual: embedding.dim(),
                });
            }
        }
        records.push(IdentityRecord {
            identity_id,
            identity_name: identity_name.to_string(),
            embedding,
        });
        tracing::debug!(identity_id, total = records.len(), "record inserted");
        Ok(())
    }

    async fn nearest_neighbor(
        &self,
        query: &Embedding,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        let records = self.records.read().await;

        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;
        for (i, record) in records.iter().enumerate() {
            let dist = query.euclidean_distance(&record.embedding);
            if best_idx.is_none() || dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        Ok(best_idx.map(|idx| records[idx].clone()))
    }

    async fn delete_by_identity(&self, identity_id: i64) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.identity_id != identity_id);
        Ok(before - records.len())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.read().await.len())
    }
}

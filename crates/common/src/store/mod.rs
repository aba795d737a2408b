//! Chunk/document store accessor
//!
//! The retrieval pipeline only needs a read-only view joining a chunk to its
//! owning document's source and title. The real vector store (SQLite or
//! pgvector) lives behind this trait and is operated elsewhere; this core
//! never writes through it.

use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Read-only view joining a chunk to its owning document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// Chunk ID
    pub id: String,

    /// Source tag of the owning document (e.g., "wechat", "gmail")
    pub source: String,

    /// Title of the owning document, if any
    pub title: Option<String>,
}

/// Read-only accessor over the chunk/document store.
///
/// Unknown ids resolve to `Ok(None)` - a missing chunk is never an error.
/// Transport failures are errors, but callers in this core absorb them as
/// degraded paths rather than propagating.
#[async_trait]
pub trait StoreAccessor: Send + Sync {
    /// Resolve a chunk id to its parent document's metadata
    async fn chunk_with_doc(&self, chunk_id: &str) -> Result<Option<ChunkMetadata>>;
}

/// In-memory store accessor for tests and broker-less deployments
#[derive(Default)]
pub struct InMemoryStore {
    chunks: RwLock<HashMap<String, ChunkMetadata>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a chunk's metadata
    pub fn insert(&self, meta: ChunkMetadata) {
        self.chunks
            .write()
            .expect("store lock poisoned")
            .insert(meta.id.clone(), meta);
    }

    /// Convenience constructor from (id, source, title) triples
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String, Option<String>)>,
    {
        let store = Self::new();
        for (id, source, title) in entries {
            store.insert(ChunkMetadata { id, source, title });
        }
        store
    }
}

#[async_trait]
impl StoreAccessor for InMemoryStore {
    async fn chunk_with_doc(&self, chunk_id: &str) -> Result<Option<ChunkMetadata>> {
        let chunks = self.chunks.read().expect("store lock poisoned");
        Ok(chunks.get(chunk_id).cloned())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::errors::AppError;

    /// Store accessor that fails every lookup, for degraded-path tests
    pub struct FailingStore;

    #[async_trait]
    impl StoreAccessor for FailingStore {
        async fn chunk_with_doc(&self, _chunk_id: &str) -> Result<Option<ChunkMetadata>> {
            Err(AppError::Internal {
                message: "store unavailable".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_id_is_none_not_error() {
        let store = InMemoryStore::new();
        let result = store.chunk_with_doc("missing").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_lookup_returns_metadata() {
        let store = InMemoryStore::from_entries(vec![(
            "c1".to_string(),
            "wechat".to_string(),
            Some("Trip plans".to_string()),
        )]);

        let meta = store.chunk_with_doc("c1").await.unwrap().unwrap();
        assert_eq!(meta.source, "wechat");
        assert_eq!(meta.title.as_deref(), Some("Trip plans"));
    }
}

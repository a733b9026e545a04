//! In-memory knowledge index — useful for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use turnstile_core::KnowledgeError;

use crate::vector::rank_chunks;
use crate::{KnowledgeChunk, KnowledgeIndex, SearchOptions, StoredChunk};

pub struct InMemoryIndex {
    chunks: Arc<RwLock<Vec<StoredChunk>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<usize, KnowledgeError> {
        let mut stored = self.chunks.write().await;
        let written = chunks.len();
        for chunk in chunks {
            match stored.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => stored.push(chunk),
            }
        }
        Ok(written)
    }

    async fn search(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
        let stored = self.chunks.read().await;
        Ok(rank_chunks(stored.iter(), embedding, options))
    }

    async fn delete_source(&self, source: &str) -> Result<usize, KnowledgeError> {
        let mut stored = self.chunks.write().await;
        let before = stored.len();
        stored.retain(|c| c.source != source);
        Ok(before - stored.len())
    }

    async fn count(&self) -> Result<usize, KnowledgeError> {
        Ok(self.chunks.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: &str, source: &str, embedding: Vec<f32>) -> StoredChunk {
        StoredChunk {
            id: id.into(),
            content: format!("about {id}"),
            source: source.into(),
            chunk_index: 0,
            embedding,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let index = InMemoryIndex::new();
        index.upsert(vec![stored("x", "s", vec![1.0, 0.0])]).await.unwrap();
        index.upsert(vec![stored("x", "s", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);

        let hits = index.search(&[0.0, 1.0], &SearchOptions::default()).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn empty_index_returns_no_hits() {
        let index = InMemoryIndex::new();
        let hits = index.search(&[1.0, 0.0], &SearchOptions::default()).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_source_removes_only_that_source() {
        let index = InMemoryIndex::new();
        index
            .upsert(vec![
                stored("a", "guide", vec![1.0]),
                stored("b", "guide", vec![1.0]),
                stored("c", "faq", vec![1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(index.delete_source("guide").await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 1);
    }
}

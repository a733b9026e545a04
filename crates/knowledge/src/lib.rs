//! Knowledge retrieval for Turnstile.
//!
//! Turns a user query into a context block for the completion prompt:
//! a cheap keyword gate decides whether retrieval is worth paying for,
//! then the query is embedded, matched against an index of document
//! chunks by cosine similarity, and the best chunks are assembled with
//! their source labels.
//!
//! Retrieval is best effort. Any failure on the request path degrades to
//! "no knowledge" and the turn proceeds without it.

pub mod embedder;
pub mod memory;
pub mod retriever;
pub mod sqlite;
pub mod vector;

pub use embedder::{Embedder, ProviderEmbedder};
pub use memory::InMemoryIndex;
pub use retriever::KnowledgeRetriever;
pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use turnstile_core::KnowledgeError;

/// A chunk returned by a search, scored against the query.
///
/// Built fresh for each request and dropped after context assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub content: String,
    pub source: String,
    pub chunk_index: usize,
    /// Cosine similarity to the query, in `[threshold, 1]`
    pub similarity: f32,
}

/// A chunk as persisted in an index.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub content: String,
    pub source: String,
    pub chunk_index: usize,
    pub embedding: Vec<f32>,
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub max_chunks: usize,
    pub similarity_threshold: f32,
    /// Only chunks from this source label
    pub filter_source: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_chunks: 4,
            similarity_threshold: 0.65,
            filter_source: None,
        }
    }
}

/// The context block handed to the prompt builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub context: String,
    /// Distinct source labels, in rank order
    pub sources: Vec<String>,
    pub has_relevant_knowledge: bool,
}

impl AssembledContext {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Nearest-neighbour storage for document chunks.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace chunks by id. Returns how many were written.
    async fn upsert(&self, chunks: Vec<StoredChunk>) -> Result<usize, KnowledgeError>;

    /// At most `options.max_chunks` chunks with similarity at or above the
    /// threshold, best first. An empty result is not an error.
    async fn search(
        &self,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<KnowledgeChunk>, KnowledgeError>;

    /// Remove every chunk of `source`. Returns how many were removed.
    async fn delete_source(&self, source: &str) -> Result<usize, KnowledgeError>;

    async fn count(&self) -> Result<usize, KnowledgeError>;
}

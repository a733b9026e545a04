//! Query → embedding → search → context.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use turnstile_config::KnowledgeConfig;
use turnstile_core::{KnowledgeError, split_segments};

use crate::embedder::Embedder;
use crate::{AssembledContext, KnowledgeChunk, KnowledgeIndex, SearchOptions, StoredChunk};

/// Small talk that never needs retrieval.
const CONVERSATIONAL: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "thank you so much", "thanks a lot", "ok",
    "okay", "yes", "no", "sure", "cool", "great", "awesome", "bye", "goodbye", "good morning",
    "good afternoon", "good evening", "how are you", "what's up", "nice to meet you",
    "sounds good", "that's great", "got it", "perfect",
];

/// Openers of follow-ups that lean on the previous answer.
const CONTINUATION_PREFIXES: &[&str] = &[
    "continue", "go on", "keep going", "tell me more", "more please", "and then", "what else",
    "carry on", "finish that",
];

const SEPARATOR: &str = "\n\n---\n\n";

pub struct KnowledgeRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn KnowledgeIndex>,
    options: SearchOptions,
    min_query_chars: usize,
    topic_keywords: Vec<String>,
    timeout: Duration,
    ingest_chunk_chars: usize,
}

impl KnowledgeRetriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn KnowledgeIndex>,
        config: &KnowledgeConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            options: SearchOptions {
                max_chunks: config.max_chunks,
                similarity_threshold: config.similarity_threshold,
                filter_source: None,
            },
            min_query_chars: config.min_query_chars,
            topic_keywords: config
                .topic_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            timeout: Duration::from_millis(config.timeout_ms),
            ingest_chunk_chars: config.ingest_chunk_chars,
        }
    }

    /// Whether `query` is worth an embedding call.
    ///
    /// Rejects very short input, small talk, continuation phrases, and
    /// queries that mention none of the topic keywords.
    pub fn should_retrieve(&self, query: &str) -> bool {
        let normalized = query.trim().to_lowercase();
        if normalized.chars().count() < self.min_query_chars {
            return false;
        }

        let bare = normalized.trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
        if CONVERSATIONAL.contains(&bare) {
            return false;
        }
        if CONTINUATION_PREFIXES.iter().any(|p| bare.starts_with(p)) {
            return false;
        }

        let words: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();

        self.topic_keywords.iter().any(|keyword| {
            if keyword.contains(' ') {
                normalized.contains(keyword.as_str())
            } else {
                words.iter().any(|w| keyword_matches(w, keyword))
            }
        })
    }

    /// Embed one query. Fails rather than returning a degraded vector.
    pub async fn embed(&self, query: &str) -> Result<Vec<f32>, KnowledgeError> {
        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| KnowledgeError::Embedding("no embedding returned".into()))
    }

    pub async fn search(
        &self,
        vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<KnowledgeChunk>, KnowledgeError> {
        self.index.search(vector, options).await
    }

    /// Join chunks under source headers; sources are listed once each.
    pub fn assemble_context(chunks: &[KnowledgeChunk]) -> AssembledContext {
        if chunks.is_empty() {
            return AssembledContext::empty();
        }

        let mut sources: Vec<String> = Vec::new();
        let mut blocks = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if !sources.contains(&chunk.source) {
                sources.push(chunk.source.clone());
            }
            blocks.push(format!("[Source: {}]\n{}", chunk.source, chunk.content.trim()));
        }

        AssembledContext {
            context: blocks.join(SEPARATOR),
            sources,
            has_relevant_knowledge: true,
        }
    }

    /// The whole best-effort path for one request.
    ///
    /// Returns an empty context when the gate rejects the query, nothing
    /// clears the threshold, or embedding/search fails or runs past the
    /// configured timeout.
    pub async fn retrieve(&self, query: &str) -> AssembledContext {
        if !self.should_retrieve(query) {
            debug!("Query skipped knowledge retrieval");
            return AssembledContext::empty();
        }

        let lookup = async {
            let vector = self.embed(query).await?;
            self.search(&vector, &self.options).await
        };

        let result = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(KnowledgeError::Timeout {
                millis: self.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(chunks) => {
                debug!(hits = chunks.len(), "Knowledge search complete");
                Self::assemble_context(&chunks)
            }
            Err(e) => {
                warn!(
                    event = "knowledge_degraded",
                    index = %self.index.name(),
                    error = %e,
                    "Knowledge retrieval failed, continuing without context"
                );
                AssembledContext::empty()
            }
        }
    }

    /// Split `text` into segments, embed them, and replace everything
    /// previously indexed under `source`. Returns the number of chunks.
    pub async fn ingest(&self, source: &str, text: &str) -> Result<usize, KnowledgeError> {
        let segments: Vec<String> = split_segments(text, self.ingest_chunk_chars)
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if segments.is_empty() {
            return Ok(0);
        }

        let embeddings = self.embedder.embed(&segments).await?;
        let chunks: Vec<StoredChunk> = segments
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (content, embedding))| StoredChunk {
                id: format!("{source}#{i}"),
                content,
                source: source.to_string(),
                chunk_index: i,
                embedding,
            })
            .collect();

        let removed = self.index.delete_source(source).await?;
        let written = self.index.upsert(chunks).await?;
        info!(source, written, replaced = removed, "Ingested document");
        Ok(written)
    }
}

/// Whole-word match that also accepts simple plurals and, for longer
/// keywords, inflections (`automate` → `automated`).
fn keyword_matches(word: &str, keyword: &str) -> bool {
    if word == keyword {
        return true;
    }
    if let Some(stem) = word.strip_suffix('s') {
        if stem == keyword {
            return true;
        }
    }
    keyword.len() >= 5 && word.starts_with(keyword)
}

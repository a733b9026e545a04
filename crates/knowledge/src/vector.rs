//! Vector similarity utilities.

use crate::{KnowledgeChunk, SearchOptions, StoredChunk};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if the lengths differ or either vector is empty or zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank stored chunks against a query embedding.
///
/// Applies the source filter and similarity threshold, sorts by
/// descending similarity (ties by source then chunk index), and keeps at
/// most `max_chunks`.
pub fn rank_chunks<'a>(
    chunks: impl IntoIterator<Item = &'a StoredChunk>,
    query_embedding: &[f32],
    options: &SearchOptions,
) -> Vec<KnowledgeChunk> {
    let mut scored: Vec<KnowledgeChunk> = chunks
        .into_iter()
        .filter(|c| {
            options
                .filter_source
                .as_deref()
                .is_none_or(|source| c.source == source)
        })
        .filter_map(|c| {
            let similarity = cosine_similarity(&c.embedding, query_embedding);
            (similarity >= options.similarity_threshold).then(|| KnowledgeChunk {
                id: c.id.clone(),
                content: c.content.clone(),
                source: c.source.clone(),
                chunk_index: c.chunk_index,
                similarity,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
    scored.truncate(options.max_chunks);
    scored
}

/// Serialize an embedding vector to little-endian bytes.
pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub(crate) fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

//! Vector index trait for storing chunk embeddings and querying by similarity.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::{ChunkId, DocumentId, IndexStatistics, MetadataFilter, NewChunk, SearchResult};
use crate::error::{RagError, Result};

/// Durable storage of chunks with cosine-similarity queries.
///
/// Implementations own the physical chunk records. They enforce the
/// `(document_id, chunk_index)` uniqueness, the metadata filter and the
/// similarity threshold; nearest-neighbour search itself is left to the
/// backing store.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{InMemoryVectorIndex, MetadataFilter, VectorIndex};
///
/// let index = InMemoryVectorIndex::new(1536);
/// let id = index.store(new_chunk).await?;
/// let hits = index.query(&query_embedding, 5, &MetadataFilter::tenant("acme"), 0.7).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend name used in logs and error messages.
    fn backend(&self) -> &str;

    /// Embedding dimension accepted by this index.
    fn dimensions(&self) -> usize;

    /// Write one chunk and return its id.
    ///
    /// Fails with [`RagError::DuplicateChunk`] if the document already has a
    /// live chunk at that index.
    async fn store(&self, chunk: NewChunk) -> Result<ChunkId>;

    /// Return at most `top_k` chunks matching `filter` whose similarity is at
    /// least `similarity_threshold`, most similar first.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchResult>>;

    /// Remove every chunk of a document and return how many were removed.
    async fn delete_document(&self, document_id: &DocumentId) -> Result<usize>;

    /// Replace a document's whole chunk set in one step.
    ///
    /// Readers observe either the old set or the new one, never a mix.
    async fn replace_document(
        &self,
        document_id: &DocumentId,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<ChunkId>>;

    /// Number of live chunks for a document.
    async fn document_chunk_count(&self, document_id: &DocumentId) -> Result<usize>;

    /// Creation time of the document's oldest live chunk, `None` if it has none.
    async fn document_indexed_at(&self, document_id: &DocumentId) -> Result<Option<DateTime<Utc>>>;

    /// Aggregate figures over the chunks matching `filter`.
    async fn statistics(&self, filter: &MetadataFilter) -> Result<IndexStatistics>;
}

/// Most similar first; equal scores fall back to document id, then chunk index.
pub(crate) fn rank_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.similarity_score
            .total_cmp(&a.similarity_score)
            .then_with(|| a.document_id.cmp(&b.document_id))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
}

pub(crate) fn check_dimension(backend: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(RagError::ConfigError(format!(
            "{backend} index expects {expected}-dimensional embeddings, got {actual}"
        )));
    }
    Ok(())
}

pub(crate) fn check_query(
    backend: &str,
    dimensions: usize,
    embedding: &[f32],
    top_k: usize,
) -> Result<()> {
    if top_k == 0 {
        return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
    }
    check_dimension(backend, dimensions, embedding.len())
}

/// Validate a replacement set: right dimension, right document, unique indices.
pub(crate) fn check_replacement(
    backend: &str,
    dimensions: usize,
    document_id: &DocumentId,
    chunks: &[NewChunk],
) -> Result<()> {
    let mut seen = HashSet::with_capacity(chunks.len());
    for chunk in chunks {
        check_dimension(backend, dimensions, chunk.embedding.len())?;
        if &chunk.document_id != document_id {
            return Err(RagError::ConfigError(format!(
                "chunk {} belongs to document '{}', not '{document_id}'",
                chunk.chunk_index, chunk.document_id
            )));
        }
        if !seen.insert(chunk.chunk_index) {
            return Err(RagError::DuplicateChunk {
                document_id: document_id.clone(),
                chunk_index: chunk.chunk_index,
            });
        }
    }
    Ok(())
}

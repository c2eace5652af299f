//! In-memory vector index using cosine similarity.
//!
//! [`InMemoryVectorIndex`] keeps every document's chunks in an immutable
//! snapshot behind a `tokio::sync::RwLock`. Readers clone the snapshot `Arc`
//! and search without holding the lock; writers copy-on-write the affected
//! document's chunk list and publish a new snapshot. It is suitable for
//! development, testing, and small single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{
    Chunk, ChunkId, DocumentId, IndexStatistics, MetadataFilter, NewChunk, SearchResult,
};
use crate::error::{RagError, Result};
use crate::vectorstore::{
    VectorIndex, check_dimension, check_query, check_replacement, rank_results,
};

const BACKEND: &str = "in-memory";

type Snapshot = Arc<HashMap<DocumentId, Arc<Vec<Chunk>>>>;

/// An in-memory vector index using cosine similarity for search.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new(384);
/// index.store(chunk).await?;
/// ```
#[derive(Debug)]
pub struct InMemoryVectorIndex {
    dimensions: usize,
    documents: RwLock<Snapshot>,
}

impl InMemoryVectorIndex {
    /// Create a new empty index for embeddings of the given dimension.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions, documents: RwLock::new(Arc::default()) }
    }

    async fn snapshot(&self) -> Snapshot {
        self.documents.read().await.clone()
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn store(&self, chunk: NewChunk) -> Result<ChunkId> {
        check_dimension(BACKEND, self.dimensions, chunk.embedding.len())?;

        let mut guard = self.documents.write().await;
        if guard
            .get(&chunk.document_id)
            .is_some_and(|chunks| chunks.iter().any(|c| c.chunk_index == chunk.chunk_index))
        {
            return Err(RagError::DuplicateChunk {
                document_id: chunk.document_id,
                chunk_index: chunk.chunk_index,
            });
        }

        let stored = Chunk::from_new(chunk);
        let id = stored.id;
        let documents = Arc::make_mut(&mut *guard);
        let chunks = documents.entry(stored.document_id.clone()).or_default();
        Arc::make_mut(chunks).push(stored);
        Ok(id)
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        check_query(BACKEND, self.dimensions, embedding, top_k)?;
        let snapshot = self.snapshot().await;

        let mut scored: Vec<SearchResult> = snapshot
            .values()
            .flat_map(|chunks| chunks.iter())
            .filter(|chunk| filter.matches(&chunk.metadata))
            .filter_map(|chunk| {
                let similarity_score = cosine_similarity(&chunk.embedding, embedding);
                (similarity_score >= similarity_threshold).then(|| SearchResult {
                    chunk_id: chunk.id,
                    document_id: chunk.document_id.clone(),
                    chunk_index: chunk.chunk_index,
                    content: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                    similarity_score,
                })
            })
            .collect();

        rank_results(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_document(&self, document_id: &DocumentId) -> Result<usize> {
        let mut guard = self.documents.write().await;
        if !guard.contains_key(document_id) {
            return Ok(0);
        }
        let removed =
            Arc::make_mut(&mut *guard).remove(document_id).map_or(0, |chunks| chunks.len());
        debug!(document.id = %document_id, removed, "deleted document chunks");
        Ok(removed)
    }

    async fn replace_document(
        &self,
        document_id: &DocumentId,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<ChunkId>> {
        check_replacement(BACKEND, self.dimensions, document_id, &chunks)?;

        let stored: Vec<Chunk> = chunks.into_iter().map(Chunk::from_new).collect();
        let ids = stored.iter().map(|c| c.id).collect();

        let mut guard = self.documents.write().await;
        let documents = Arc::make_mut(&mut *guard);
        if stored.is_empty() {
            documents.remove(document_id);
        } else {
            documents.insert(document_id.clone(), Arc::new(stored));
        }
        Ok(ids)
    }

    async fn document_chunk_count(&self, document_id: &DocumentId) -> Result<usize> {
        Ok(self.snapshot().await.get(document_id).map_or(0, |chunks| chunks.len()))
    }

    async fn document_indexed_at(&self, document_id: &DocumentId) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .snapshot()
            .await
            .get(document_id)
            .and_then(|chunks| chunks.iter().map(|c| c.created_at).min()))
    }

    async fn statistics(&self, filter: &MetadataFilter) -> Result<IndexStatistics> {
        let snapshot = self.snapshot().await;
        let mut stats = IndexStatistics::default();
        let mut total_chars = 0usize;

        for chunks in snapshot.values() {
            let visible: Vec<&Chunk> =
                chunks.iter().filter(|c| filter.matches(&c.metadata)).collect();
            if visible.is_empty() {
                continue;
            }
            stats.total_documents += 1;
            stats.total_chunks += visible.len();
            total_chars += visible.iter().map(|c| c.content.chars().count()).sum::<usize>();
        }

        if stats.total_chunks > 0 {
            stats.avg_chunk_length = total_chars as f64 / stats.total_chunks as f64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkMetadata;

    fn chunk(document: &str, index: usize, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            document_id: DocumentId::new(document),
            chunk_index: index,
            content: format!("{document} chunk {index}"),
            embedding,
            metadata: ChunkMetadata::new("acme"),
        }
    }

    #[test]
    fn cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn duplicate_chunk_positions_are_rejected() {
        let index = InMemoryVectorIndex::new(2);
        index.store(chunk("d1", 0, vec![1.0, 0.0])).await.unwrap();
        let err = index.store(chunk("d1", 0, vec![0.0, 1.0])).await.unwrap_err();
        assert!(matches!(err, RagError::DuplicateChunk { chunk_index: 0, .. }));
        assert_eq!(index.document_chunk_count(&DocumentId::new("d1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn wrong_dimension_is_a_config_error() {
        let index = InMemoryVectorIndex::new(3);
        let short = index.store(chunk("d1", 0, vec![1.0])).await;
        assert!(matches!(short, Err(RagError::ConfigError(_))));
        let filter = MetadataFilter::tenant("acme");
        assert!(index.query(&[1.0], 1, &filter, 0.0).await.is_err());
        assert!(index.query(&[1.0, 0.0, 0.0], 0, &filter, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_a_replace() {
        let index = InMemoryVectorIndex::new(2);
        let doc = DocumentId::new("d1");
        index.store(chunk("d1", 0, vec![1.0, 0.0])).await.unwrap();
        index.store(chunk("d1", 1, vec![0.0, 1.0])).await.unwrap();

        let before = index.snapshot().await;
        index.replace_document(&doc, vec![chunk("d1", 0, vec![1.0, 1.0])]).await.unwrap();

        assert_eq!(before.get(&doc).unwrap().len(), 2);
        assert_eq!(index.document_chunk_count(&doc).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replacement_with_foreign_chunks_is_rejected() {
        let index = InMemoryVectorIndex::new(2);
        let err = index
            .replace_document(&DocumentId::new("d1"), vec![chunk("d2", 0, vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[tokio::test]
    async fn statistics_respect_the_filter() {
        let index = InMemoryVectorIndex::new(2);
        index.store(chunk("d1", 0, vec![1.0, 0.0])).await.unwrap();
        index.store(chunk("d1", 1, vec![0.0, 1.0])).await.unwrap();
        let mut other = chunk("d2", 0, vec![1.0, 0.0]);
        other.metadata = ChunkMetadata::new("globex");
        index.store(other).await.unwrap();

        let stats = index.statistics(&MetadataFilter::tenant("acme")).await.unwrap();
        assert_eq!(stats.total_documents, 1);
        assert_eq!(stats.total_chunks, 2);
        assert!((stats.avg_chunk_length - "d1 chunk 0".len() as f64).abs() < 1e-9);

        let empty = index.statistics(&MetadataFilter::tenant("initech")).await.unwrap();
        assert_eq!(empty, IndexStatistics::default());
    }

    #[tokio::test]
    async fn delete_reports_removed_count() {
        let index = InMemoryVectorIndex::new(2);
        index.store(chunk("d1", 0, vec![1.0, 0.0])).await.unwrap();
        index.store(chunk("d1", 1, vec![0.0, 1.0])).await.unwrap();
        assert_eq!(index.delete_document(&DocumentId::new("d1")).await.unwrap(), 2);
        assert_eq!(index.delete_document(&DocumentId::new("d1")).await.unwrap(), 0);
    }
}

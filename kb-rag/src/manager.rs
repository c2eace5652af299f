//! Index orchestration: chunk → embed → store, for one or many documents.
//!
//! Every embedding call goes through one shared [`Semaphore`], so concurrent
//! indexing operations together never exceed `max_concurrency` calls in
//! flight. Writes to the same document are serialized by a per-document lock;
//! writes to different documents do not wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tracing::{error, info, warn};

use crate::cancellation::CancellationToken;
use crate::chunking::Chunker;
use crate::config::{RagConfig, RetryPolicy};
use crate::document::{
    BulkIndexReport, ChunkId, Document, DocumentError, DocumentId, IndexReport, IndexStatistics,
    MetadataFilter, NewChunk,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{ChunkFailure, ProviderErrorKind, RagError, Result};
use crate::retry::with_retry;
use crate::vectorstore::VectorIndex;

/// What [`IndexManager::sync_document`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The document had no chunks and was indexed.
    Indexed(IndexReport),
    /// The document was edited after its chunks were written, or its chunk
    /// set was incomplete, and it was reindexed.
    Reindexed(IndexReport),
    /// The chunks are current; nothing was written.
    Fresh,
}

enum Freshness {
    /// No live chunks.
    Missing,
    /// Edited after the chunks were written.
    Stale(DateTime<Utc>),
    /// Chunk count differs from a fresh chunking, e.g. after a partial failure.
    Incomplete { live: usize, expected: usize },
    Current,
}

/// Per-document write locks, dropped from the registry once unused.
#[derive(Debug, Default)]
struct DocumentLocks {
    locks: Mutex<HashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    async fn acquire(&self, document_id: &DocumentId) -> DocumentGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(document_id.clone()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        DocumentGuard { registry: self, document_id: document_id.clone(), lock, guard: Some(guard) }
    }
}

struct DocumentGuard<'a> {
    registry: &'a DocumentLocks,
    document_id: DocumentId,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.registry.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Registry entry plus ours: nobody else is holding or waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.document_id);
        }
    }
}

/// Orchestrates chunking, embedding and storage of knowledge-base documents.
pub struct IndexManager {
    chunker: Arc<dyn Chunker>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    retry: RetryPolicy,
    max_concurrency: usize,
    permits: Arc<Semaphore>,
    locks: DocumentLocks,
}

impl IndexManager {
    /// Wire a manager from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the provider's embedding dimension
    /// differs from the index dimension or the config is invalid.
    pub fn new(
        chunker: Arc<dyn Chunker>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: &RagConfig,
    ) -> Result<Self> {
        config.validate()?;
        if embedding_provider.dimensions() != index.dimensions() {
            return Err(RagError::ConfigError(format!(
                "embedding provider '{}' produces {}-dimensional vectors \
                 but the {} index stores {}",
                embedding_provider.name(),
                embedding_provider.dimensions(),
                index.backend(),
                index.dimensions()
            )));
        }
        Ok(Self {
            chunker,
            embedding_provider,
            index,
            retry: config.retry.clone(),
            max_concurrency: config.max_concurrency,
            permits: Arc::new(Semaphore::new(config.max_concurrency)),
            locks: DocumentLocks::default(),
        })
    }

    /// Embedding calls that could start right now without waiting.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Index a document that has no live chunks.
    ///
    /// Chunks are embedded concurrently; one failing chunk does not stop the
    /// others. A document left incomplete by an earlier partial failure is
    /// reindexed as a whole.
    ///
    /// # Errors
    ///
    /// - [`RagError::ConfigError`] if the document id cannot appear in a citation marker
    /// - [`RagError::AlreadyIndexed`] if the document already has a complete chunk set
    /// - [`RagError::PartialIndexError`] if some chunks failed; the others stay stored
    /// - [`RagError::IndexError`] if every chunk failed
    pub async fn index_document(&self, document: &Document) -> Result<IndexReport> {
        document.id.validate()?;
        let _guard = self.locks.acquire(&document.id).await;
        match self.freshness(document).await? {
            Freshness::Missing => self.index_locked(document).await,
            Freshness::Incomplete { live, expected } => {
                warn!(
                    document.id = %document.id,
                    live,
                    expected,
                    "chunk set is incomplete, reindexing"
                );
                self.reindex_locked(document).await
            }
            Freshness::Stale(_) | Freshness::Current => {
                Err(RagError::AlreadyIndexed { document_id: document.id.clone() })
            }
        }
    }

    /// Replace a document's chunks with chunks of its current content.
    ///
    /// All new chunks are embedded before anything is written, then swapped in
    /// atomically. A document that was never indexed is simply indexed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexError`] listing the failed chunk indices if any
    /// chunk could not be embedded; the previous chunk set then stays live.
    pub async fn reindex_document(&self, document: &Document) -> Result<IndexReport> {
        document.id.validate()?;
        let _guard = self.locks.acquire(&document.id).await;
        self.reindex_locked(document).await
    }

    /// Remove all chunks of a document and return how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFoundError`] if the document has no chunks.
    pub async fn delete_document(&self, document_id: &DocumentId) -> Result<usize> {
        let _guard = self.locks.acquire(document_id).await;
        let removed = self.index.delete_document(document_id).await?;
        if removed == 0 {
            return Err(RagError::NotFoundError { entity: "document", id: document_id.to_string() });
        }
        info!(document.id = %document_id, removed, "deleted document");
        Ok(removed)
    }

    /// Whether the document's live chunks no longer match its content.
    ///
    /// True when the document was edited after its chunks were written, or
    /// when fewer or more chunks are live than its content chunks into. A
    /// document without `updated_at` is only checked for completeness.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFoundError`] if the document has no chunks.
    pub async fn is_stale(&self, document: &Document) -> Result<bool> {
        match self.freshness(document).await? {
            Freshness::Missing => {
                Err(RagError::NotFoundError { entity: "document", id: document.id.to_string() })
            }
            Freshness::Current => Ok(false),
            Freshness::Stale(_) | Freshness::Incomplete { .. } => Ok(true),
        }
    }

    /// Bring a document's chunks up to date: index it if absent, reindex it if
    /// stale or incomplete, otherwise leave it alone.
    pub async fn sync_document(&self, document: &Document) -> Result<SyncOutcome> {
        document.id.validate()?;
        let _guard = self.locks.acquire(&document.id).await;
        match self.freshness(document).await? {
            Freshness::Missing => Ok(SyncOutcome::Indexed(self.index_locked(document).await?)),
            Freshness::Stale(indexed_at) => {
                info!(document.id = %document.id, %indexed_at, "chunks are stale, reindexing");
                Ok(SyncOutcome::Reindexed(self.reindex_locked(document).await?))
            }
            Freshness::Incomplete { live, expected } => {
                warn!(
                    document.id = %document.id,
                    live,
                    expected,
                    "chunk set is incomplete, reindexing"
                );
                Ok(SyncOutcome::Reindexed(self.reindex_locked(document).await?))
            }
            Freshness::Current => Ok(SyncOutcome::Fresh),
        }
    }

    /// Index many documents, continuing past per-document failures.
    pub async fn bulk_index(&self, documents: &[Document]) -> BulkIndexReport {
        self.bulk_index_with_cancellation(documents, &CancellationToken::new()).await
    }

    /// Index many documents one after another.
    ///
    /// Each document goes through [`index_document`](Self::index_document), so
    /// rerunning a batch repairs documents an earlier run left incomplete.
    /// `cancel` is checked before each document. A provider error that will
    /// not go away (bad credentials, exhausted quota) stops the batch; other
    /// failures are recorded and the batch moves on.
    pub async fn bulk_index_with_cancellation(
        &self,
        documents: &[Document],
        cancel: &CancellationToken,
    ) -> BulkIndexReport {
        let total = documents.len();
        let mut report = BulkIndexReport { total, ..BulkIndexReport::default() };

        for (position, document) in documents.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.skipped = total - position;
                warn!(processed = position, skipped = report.skipped, "bulk index cancelled");
                break;
            }

            match self.index_document(document).await {
                Ok(_) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    report.per_document_errors.push(DocumentError {
                        document_id: document.id.clone(),
                        message: e.to_string(),
                        failed_chunks: e.failed_chunks(),
                    });
                    if e.is_fatal() {
                        report.skipped = total - position - 1;
                        report.aborted =
                            Some(format!("stopped at document '{}': {e}", document.id));
                        error!(
                            document.id = %document.id,
                            error = %e,
                            skipped = report.skipped,
                            "bulk index aborted"
                        );
                        break;
                    }
                    warn!(
                        document.id = %document.id,
                        error = %e,
                        "document failed during bulk index"
                    );
                }
            }
        }

        info!(
            total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "bulk index completed"
        );
        report
    }

    /// Aggregate figures over the chunks visible through `filter`.
    pub async fn statistics(&self, filter: &MetadataFilter) -> Result<IndexStatistics> {
        self.index.statistics(filter).await
    }

    /// Compare the live chunks of a document with its current content.
    async fn freshness(&self, document: &Document) -> Result<Freshness> {
        let Some(indexed_at) = self.index.document_indexed_at(&document.id).await? else {
            return Ok(Freshness::Missing);
        };
        if document.updated_at.is_some_and(|updated_at| updated_at > indexed_at) {
            return Ok(Freshness::Stale(indexed_at));
        }
        let live = self.index.document_chunk_count(&document.id).await?;
        let expected = self.chunker.chunk(&document.content).len();
        if live != expected {
            return Ok(Freshness::Incomplete { live, expected });
        }
        Ok(Freshness::Current)
    }

    async fn index_locked(&self, document: &Document) -> Result<IndexReport> {
        let chunks = self.chunker.chunk(&document.content);
        let total = chunks.len();
        if total == 0 {
            info!(document.id = %document.id, chunk_count = 0, "indexed document (empty)");
            return Ok(IndexReport { document_id: document.id.clone(), chunks_created: 0 });
        }

        let outcomes: Vec<(usize, Result<ChunkId>)> = stream::iter(chunks.into_iter().enumerate())
            .map(|(chunk_index, content)| async move {
                let outcome = self.embed_and_store(document, chunk_index, content).await;
                (chunk_index, outcome)
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut chunks_created = 0;
        let mut failures = Vec::new();
        for (chunk_index, outcome) in outcomes {
            match outcome {
                Ok(_) => chunks_created += 1,
                Err(e) => {
                    warn!(
                        document.id = %document.id,
                        chunk_index,
                        error = %e,
                        "chunk failed to index"
                    );
                    failures.push(ChunkFailure::from_error(chunk_index, &e));
                }
            }
        }
        failures.sort_by_key(|f| f.chunk_index);

        if failures.is_empty() {
            info!(document.id = %document.id, chunk_count = chunks_created, "indexed document");
            Ok(IndexReport { document_id: document.id.clone(), chunks_created })
        } else if chunks_created == 0 {
            error!(document.id = %document.id, chunk_count = total, "every chunk failed to index");
            Err(RagError::IndexError {
                document_id: document.id.clone(),
                message: format!("all {total} chunks failed to index"),
                failures,
            })
        } else {
            Err(RagError::PartialIndexError {
                document_id: document.id.clone(),
                chunks_created,
                failures,
            })
        }
    }

    async fn reindex_locked(&self, document: &Document) -> Result<IndexReport> {
        let chunks = self.chunker.chunk(&document.content);
        let total = chunks.len();

        let mut outcomes: Vec<(usize, String, Result<Vec<f32>>)> =
            stream::iter(chunks.into_iter().enumerate())
                .map(|(chunk_index, content)| async move {
                    let outcome = self.embed_chunk(&content).await;
                    (chunk_index, content, outcome)
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;
        outcomes.sort_by_key(|(chunk_index, _, _)| *chunk_index);

        let mut new_chunks = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for (chunk_index, content, outcome) in outcomes {
            match outcome {
                Ok(embedding) => new_chunks.push(NewChunk {
                    document_id: document.id.clone(),
                    chunk_index,
                    content,
                    embedding,
                    metadata: document.metadata.clone(),
                }),
                Err(e) => failures.push(ChunkFailure::from_error(chunk_index, &e)),
            }
        }

        if !failures.is_empty() {
            error!(
                document.id = %document.id,
                failed = failures.len(),
                chunk_count = total,
                "reindex aborted, previous chunks remain live"
            );
            return Err(RagError::IndexError {
                document_id: document.id.clone(),
                message: format!(
                    "reindex aborted: {} of {total} chunks failed to embed; \
                     previous chunks remain live",
                    failures.len()
                ),
                failures,
            });
        }

        let ids = self.index.replace_document(&document.id, new_chunks).await.map_err(|e| {
            error!(document.id = %document.id, error = %e, "chunk swap failed during reindex");
            e
        })?;
        info!(document.id = %document.id, chunk_count = ids.len(), "reindexed document");
        Ok(IndexReport { document_id: document.id.clone(), chunks_created: ids.len() })
    }

    async fn embed_and_store(
        &self,
        document: &Document,
        chunk_index: usize,
        content: String,
    ) -> Result<ChunkId> {
        let embedding = self.embed_chunk(&content).await?;
        self.index
            .store(NewChunk {
                document_id: document.id.clone(),
                chunk_index,
                content,
                embedding,
                metadata: document.metadata.clone(),
            })
            .await
    }

    /// Embed one chunk under the shared concurrency limit and retry policy.
    async fn embed_chunk(&self, content: &str) -> Result<Vec<f32>> {
        let provider = self.embedding_provider.name();
        let _permit = self.permits.acquire().await.map_err(|_| {
            let kind = ProviderErrorKind::InvalidRequest;
            RagError::provider(provider, kind, "embedding pool is closed")
        })?;

        let embedding = with_retry(&self.retry, provider, "chunk embedding", || {
            self.embedding_provider.embed(content)
        })
        .await?;

        let expected = self.index.dimensions();
        if embedding.len() != expected {
            return Err(RagError::provider(
                provider,
                ProviderErrorKind::InvalidResponse,
                format!("expected a {expected}-dimensional embedding, got {}", embedding.len()),
            ));
        }
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn registered(locks: &DocumentLocks) -> usize {
        locks.locks.lock().unwrap().len()
    }

    #[tokio::test(start_paused = true)]
    async fn same_document_waits_and_unused_locks_are_dropped() {
        let locks = DocumentLocks::default();
        let d1 = DocumentId::new("d1");

        let held = locks.acquire(&d1).await;
        let blocked = tokio::time::timeout(Duration::from_millis(10), locks.acquire(&d1)).await;
        assert!(blocked.is_err());

        let d2 = DocumentId::new("d2");
        let other =
            tokio::time::timeout(Duration::from_millis(10), locks.acquire(&d2)).await.unwrap();
        assert_eq!(registered(&locks), 2);

        drop(held);
        drop(other);
        assert_eq!(registered(&locks), 0);

        let again = tokio::time::timeout(Duration::from_millis(10), locks.acquire(&d1)).await;
        assert!(again.is_ok());
    }
}

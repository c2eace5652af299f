//! Knowledge-base facade.
//!
//! [`KnowledgeBase`] wires a [`TextChunker`], an [`EmbeddingProvider`], a
//! [`TextGenerationProvider`] and a [`VectorIndex`] into the index, search and
//! answer operations the rest of the system calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{
//!     ChunkMetadata, Document, InMemoryVectorIndex, KnowledgeBase, MetadataFilter, RagConfig,
//! };
//!
//! let kb = KnowledgeBase::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .generation_provider(Arc::new(generator))
//!     .vector_index(Arc::new(InMemoryVectorIndex::new(1536)))
//!     .build()?;
//!
//! kb.index_document(&Document::new("42", text, ChunkMetadata::new("acme"))).await?;
//! let answer = kb.answer("What is our CAGE code?", &MetadataFilter::tenant("acme")).await?;
//! ```

use std::sync::Arc;

use crate::answerer::GroundedAnswerer;
use crate::cancellation::CancellationToken;
use crate::chunking::{Chunker, TextChunker};
use crate::config::RagConfig;
use crate::document::{
    BulkIndexReport, Document, DocumentId, GroundedAnswer, IndexReport, IndexStatistics,
    MetadataFilter,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::TextGenerationProvider;
use crate::manager::{IndexManager, SyncOutcome};
use crate::retriever::Retriever;
use crate::vectorstore::VectorIndex;

/// Entry point for indexing, retrieval and grounded answering.
///
/// Construct one via [`KnowledgeBase::builder()`]. All methods take `&self`;
/// share it across tasks behind an `Arc`.
pub struct KnowledgeBase {
    config: RagConfig,
    manager: IndexManager,
    retriever: Arc<Retriever>,
    answerer: GroundedAnswerer,
    index: Arc<dyn VectorIndex>,
}

impl KnowledgeBase {
    pub fn builder() -> KnowledgeBaseBuilder {
        KnowledgeBaseBuilder::default()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn vector_index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Chunk, embed and store a document that has not been indexed yet.
    ///
    /// See [`IndexManager::index_document`].
    pub async fn index_document(&self, document: &Document) -> Result<IndexReport> {
        self.manager.index_document(document).await
    }

    /// Atomically replace a document's chunks with its current content.
    pub async fn reindex_document(&self, document: &Document) -> Result<IndexReport> {
        self.manager.reindex_document(document).await
    }

    /// Index many documents, continuing past per-document failures.
    pub async fn bulk_index(&self, documents: &[Document]) -> BulkIndexReport {
        self.manager.bulk_index(documents).await
    }

    pub async fn bulk_index_with_cancellation(
        &self,
        documents: &[Document],
        cancel: &CancellationToken,
    ) -> BulkIndexReport {
        self.manager.bulk_index_with_cancellation(documents, cancel).await
    }

    /// Remove all chunks of a document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFoundError`] if nothing was stored for it.
    pub async fn delete_document(&self, document_id: &DocumentId) -> Result<usize> {
        self.manager.delete_document(document_id).await
    }

    /// Index, reindex or skip a document depending on whether its chunks are current.
    pub async fn sync_document(&self, document: &Document) -> Result<SyncOutcome> {
        self.manager.sync_document(document).await
    }

    /// Whether the document changed after its chunks were written.
    pub async fn is_stale(&self, document: &Document) -> Result<bool> {
        self.manager.is_stale(document).await
    }

    /// Return citation-tagged context for `query`, or an empty string when
    /// nothing in the knowledge base clears `similarity_threshold`.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &MetadataFilter,
        similarity_threshold: f32,
    ) -> Result<String> {
        self.retriever.search(query, top_k, filter, similarity_threshold).await
    }

    /// Answer `question` strictly from the knowledge base, with citations.
    pub async fn answer(&self, question: &str, filter: &MetadataFilter) -> Result<GroundedAnswer> {
        self.answerer.answer(question, filter).await
    }

    pub async fn get_index_statistics(&self, filter: &MetadataFilter) -> Result<IndexStatistics> {
        self.manager.statistics(filter).await
    }
}

/// Builder for [`KnowledgeBase`].
///
/// The embedding provider, generation provider and vector index are
/// required. The config defaults to [`RagConfig::default()`] and the chunker
/// to a [`TextChunker`] built from it.
#[derive(Default)]
pub struct KnowledgeBaseBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    generation_provider: Option<Arc<dyn TextGenerationProvider>>,
    vector_index: Option<Arc<dyn VectorIndex>>,
    chunker: Option<Arc<dyn Chunker>>,
}

impl KnowledgeBaseBuilder {
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn generation_provider(mut self, provider: Arc<dyn TextGenerationProvider>) -> Self {
        self.generation_provider = Some(provider);
        self
    }

    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.vector_index = Some(index);
        self
    }

    /// Use a custom chunking strategy instead of the configured [`TextChunker`].
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Validate the configuration and wire the components.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required component is missing,
    /// the config is invalid, or the embedding and index dimensions differ.
    pub fn build(self) -> Result<KnowledgeBase> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let generation_provider = self
            .generation_provider
            .ok_or_else(|| RagError::ConfigError("generation_provider is required".to_string()))?;
        let index = self
            .vector_index
            .ok_or_else(|| RagError::ConfigError("vector_index is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(TextChunker::from_config(&config)?),
        };

        let manager =
            IndexManager::new(chunker, embedding_provider.clone(), index.clone(), &config)?;
        let retriever = Arc::new(Retriever::new(embedding_provider, index.clone(), &config));
        let answerer = GroundedAnswerer::new(retriever.clone(), generation_provider, &config);

        Ok(KnowledgeBase { config, manager, retriever, answerer, index })
    }
}

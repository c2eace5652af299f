//! # kb-rag
//!
//! Retrieval-augmented grounding engine for knowledge-base backed answers.
//!
//! Documents are split into overlapping chunks, embedded and stored in a
//! [`VectorIndex`] with their tenant and category metadata. Queries retrieve
//! the most similar chunks for one tenant and assemble them into a context
//! where every excerpt carries a `[KB:Doc#<id>_Chunk#<n>]` marker. The
//! [`GroundedAnswerer`] only generates text from that context and keeps the
//! citations that point at chunks it actually supplied.
//!
//! ## Features
//!
//! | Feature | Enables |
//! |---------|---------|
//! | `openai` | [`openai::OpenAIEmbeddingProvider`] and [`openai::OpenAIChatProvider`] |
//! | `pgvector` | [`pgvector::PgVectorIndex`] on PostgreSQL |
//! | `full` | both |
//!
//! The in-memory index, the chunker and every trait are always available.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kb_rag::{ChunkMetadata, Document, InMemoryVectorIndex, KnowledgeBase, MetadataFilter};
//!
//! let kb = KnowledgeBase::builder()
//!     .embedding_provider(Arc::new(embedder))
//!     .generation_provider(Arc::new(generator))
//!     .vector_index(Arc::new(InMemoryVectorIndex::new(1536)))
//!     .build()?;
//!
//! let doc = Document::new("42", "Acme holds CAGE code 1ABC2.", ChunkMetadata::new("acme"));
//! kb.index_document(&doc).await?;
//!
//! let answer = kb.answer("What is Acme's CAGE code?", &MetadataFilter::tenant("acme")).await?;
//! println!("{} ({:?})", answer.answer_text, answer.confidence);
//! ```

pub mod answerer;
pub mod cancellation;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod inmemory;
pub mod manager;
pub mod pipeline;
pub mod retriever;
pub mod retry;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "pgvector")]
pub mod pgvector;

pub use answerer::{
    GroundedAnswerer, INSUFFICIENT_INFORMATION, assess_confidence, compose_prompt,
    extract_citations,
};
pub use cancellation::CancellationToken;
pub use chunking::{ChunkSpan, Chunker, TextChunker, chunk_text};
pub use config::{AnswerConfig, RagConfig, RagConfigBuilder, RetryPolicy};
pub use document::{
    BulkIndexReport, Chunk, ChunkId, ChunkMetadata, Citation, Confidence, Document, DocumentError,
    DocumentId, GroundedAnswer, IndexReport, IndexStatistics, MetadataFilter, NewChunk,
    SearchResult, TenantId,
};
pub use embedding::EmbeddingProvider;
pub use error::{ChunkFailure, ProviderErrorKind, RagError, Result};
pub use generation::TextGenerationProvider;
pub use inmemory::{InMemoryVectorIndex, cosine_similarity};
pub use manager::{IndexManager, SyncOutcome};
pub use pipeline::{KnowledgeBase, KnowledgeBaseBuilder};
pub use retriever::{RetrievedContext, Retriever};
pub use vectorstore::VectorIndex;

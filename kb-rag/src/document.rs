//! Data types for documents, chunks, search results and grounded answers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RagError, Result};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

define_id!(
    /// Identifier of a knowledge-base document, owned by the surrounding application.
    DocumentId
);
define_id!(
    /// Identifier of the organization that owns a document.
    TenantId
);

impl DocumentId {
    /// Check that the id can be written into a citation marker and read back.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for a blank id or one containing
    /// square brackets or control characters.
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(RagError::ConfigError("document id must not be blank".to_string()));
        }
        if self.0.chars().any(|c| matches!(c, '[' | ']') || c.is_control()) {
            return Err(RagError::ConfigError(format!(
                "document id {:?} must not contain square brackets or control characters",
                self.0
            )));
        }
        Ok(())
    }
}

/// Identifier assigned to a stored chunk by the vector index.
pub type ChunkId = Uuid;

/// Metadata attached to every chunk of a document.
///
/// The load-bearing fields are typed; anything else lives in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Owning tenant. Every query filters on it.
    pub tenant_id: TenantId,
    /// Human readable document title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Knowledge-base category, e.g. `past_performance`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Document type, e.g. `capability_statement`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    /// Any additional string metadata.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl ChunkMetadata {
    /// Metadata with only the tenant set.
    pub fn new(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            title: None,
            category: None,
            document_type: None,
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A conjunction of equality predicates over [`ChunkMetadata`].
///
/// A filter cannot be built without a tenant, so every query is scoped to one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Required tenant predicate.
    pub tenant_id: TenantId,
    /// Optional category predicate.
    pub category: Option<String>,
    /// Optional document type predicate.
    pub document_type: Option<String>,
    /// Additional `extra[key] == value` predicates.
    pub extra: BTreeMap<String, String>,
}

impl MetadataFilter {
    /// A filter matching every chunk of one tenant.
    pub fn tenant(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            category: None,
            document_type: None,
            extra: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    #[must_use]
    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Whether `metadata` satisfies every predicate.
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if metadata.tenant_id != self.tenant_id {
            return false;
        }
        if self.category.is_some() && metadata.category != self.category {
            return false;
        }
        if self.document_type.is_some() && metadata.document_type != self.document_type {
            return false;
        }
        self.extra.iter().all(|(key, value)| metadata.extra.get(key) == Some(value))
    }
}

/// A knowledge-base document handed in by the surrounding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: DocumentId,
    /// Extracted text content.
    pub content: String,
    /// Metadata copied onto every chunk.
    pub metadata: ChunkMetadata,
    /// When the content was last edited, if the caller tracks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(
        id: impl Into<DocumentId>,
        content: impl Into<String>,
        metadata: ChunkMetadata,
    ) -> Self {
        Self { id: id.into(), content: content.into(), metadata, updated_at: None }
    }

    #[must_use]
    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

/// A chunk ready to be written to a [`VectorIndex`](crate::VectorIndex).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChunk {
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A stored chunk.
///
/// Chunks are never edited; a changed document gets a whole new chunk set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier assigned at write time.
    pub id: ChunkId,
    /// The owning document.
    pub document_id: DocumentId,
    /// Zero-based position within the document.
    pub chunk_index: usize,
    /// The chunk text.
    pub content: String,
    /// Embedding of `content`.
    pub embedding: Vec<f32>,
    /// Metadata inherited from the document.
    pub metadata: ChunkMetadata,
    /// When the chunk was written.
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub(crate) fn from_new(chunk: NewChunk) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id: chunk.document_id,
            chunk_index: chunk.chunk_index,
            content: chunk.content,
            embedding: chunk.embedding,
            metadata: chunk.metadata,
            created_at: Utc::now(),
        }
    }
}

/// A read-only projection of a chunk matched by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub chunk_index: usize,
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity to the query, higher is more relevant.
    pub similarity_score: f32,
}

impl SearchResult {
    /// The citation that refers to this chunk.
    pub fn citation(&self) -> Citation {
        Citation { document_id: self.document_id.clone(), chunk_index: self.chunk_index }
    }
}

/// A reference to one chunk, rendered as `[KB:Doc#<id>_Chunk#<index>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: DocumentId,
    pub chunk_index: usize,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[KB:Doc#{}_Chunk#{}]", self.document_id, self.chunk_index)
    }
}

/// How well an answer is supported by retrieved context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// The result of [`GroundedAnswerer::answer`](crate::GroundedAnswerer::answer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundedAnswer {
    /// Generated answer, or the insufficient-information message.
    pub answer_text: String,
    /// Chunks cited in the answer, in order of first appearance.
    pub citations: Vec<Citation>,
    pub confidence: Confidence,
    /// Characters of context supplied to the generation provider.
    pub context_chars_used: usize,
}

/// Outcome of indexing one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReport {
    pub document_id: DocumentId,
    pub chunks_created: usize,
}

/// A document that failed within a bulk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentError {
    pub document_id: DocumentId,
    pub message: String,
    /// Chunk indices that failed, empty if the failure was not chunk specific.
    pub failed_chunks: Vec<usize>,
}

/// Accounting for [`IndexManager::bulk_index`](crate::IndexManager::bulk_index).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkIndexReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Documents never attempted because the batch was cancelled or aborted.
    pub skipped: usize,
    pub cancelled: bool,
    /// Why the batch stopped early after a provider-fatal error.
    pub aborted: Option<String>,
    pub per_document_errors: Vec<DocumentError>,
}

/// Aggregate figures over the chunks visible to a filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub total_chunks: usize,
    pub total_documents: usize,
    /// Mean chunk length in characters.
    pub avg_chunk_length: f64,
}

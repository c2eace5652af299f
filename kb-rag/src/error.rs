//! Error types for the `kb-rag` crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::DocumentId;

/// Classification of an external provider failure.
///
/// The kind decides both whether a call is retried and whether a batch keeps
/// going after the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Credentials were rejected.
    Authentication,
    /// The account has no remaining quota.
    QuotaExceeded,
    /// The provider asked us to slow down.
    RateLimited,
    /// Transport failure or a 5xx response.
    Network,
    /// The call did not complete within the configured timeout.
    Timeout,
    /// The provider rejected the request itself.
    InvalidRequest,
    /// The provider answered with something we could not use.
    InvalidResponse,
}

impl ProviderErrorKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Network | Self::Timeout)
    }

    /// Whether further calls against the same provider are pointless.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Authentication | Self::QuotaExceeded)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authentication => "authentication",
            Self::QuotaExceeded => "quota exceeded",
            Self::RateLimited => "rate limited",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::InvalidRequest => "invalid request",
            Self::InvalidResponse => "invalid response",
        };
        f.write_str(name)
    }
}

/// A single chunk that could not be embedded or stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFailure {
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// What went wrong.
    pub message: String,
    /// Provider classification, when the failure came from a provider.
    pub kind: Option<ProviderErrorKind>,
}

impl ChunkFailure {
    pub(crate) fn from_error(chunk_index: usize, error: &RagError) -> Self {
        Self { chunk_index, message: error.to_string(), kind: error.provider_kind() }
    }
}

fn failed_indices(failures: &[ChunkFailure]) -> String {
    failures.iter().map(|f| f.chunk_index.to_string()).collect::<Vec<_>>().join(", ")
}

/// Errors that can occur in knowledge-base indexing, retrieval and grounding.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid chunking, query or engine parameters.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An embedding or generation provider call failed.
    #[error("Provider error ({provider}, {kind}): {message}")]
    ProviderError {
        /// The provider that produced the error.
        provider: String,
        /// Failure classification.
        kind: ProviderErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector index backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// Some chunks of a document were stored, others failed.
    #[error(
        "Partial index of document '{document_id}': {chunks_created} chunks stored, \
         chunks [{}] failed",
        failed_indices(.failures)
    )]
    PartialIndexError {
        /// The document being indexed.
        document_id: DocumentId,
        /// Number of chunks that were stored.
        chunks_created: usize,
        /// The chunks that failed.
        failures: Vec<ChunkFailure>,
    },

    /// No chunk of the document was stored.
    #[error("Index error for document '{document_id}': {message}")]
    IndexError {
        /// The document being indexed.
        document_id: DocumentId,
        /// Per-chunk failures, empty when the failure was not chunk specific.
        failures: Vec<ChunkFailure>,
        /// A description of the failure.
        message: String,
    },

    /// The grounded-answer generation call failed.
    #[error("Generation error: {message}")]
    GenerationError {
        /// Provider classification, when the provider reported one.
        kind: Option<ProviderErrorKind>,
        /// A description of the failure.
        message: String,
    },

    /// An operation referenced a record that does not exist.
    #[error("{entity} '{id}' not found")]
    NotFoundError {
        /// Kind of record, e.g. `document`.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// `index_document` was called for a document that already has live chunks.
    #[error("Document '{document_id}' is already indexed; reindex it instead")]
    AlreadyIndexed {
        /// The document in question.
        document_id: DocumentId,
    },

    /// A chunk with the same `(document_id, chunk_index)` is already live.
    #[error("Chunk {chunk_index} of document '{document_id}' already exists")]
    DuplicateChunk {
        /// The document in question.
        document_id: DocumentId,
        /// The conflicting chunk position.
        chunk_index: usize,
    },
}

impl RagError {
    /// Shorthand for a [`RagError::ProviderError`].
    pub fn provider(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::ProviderError { provider: provider.into(), kind, message: message.into() }
    }

    /// The provider classification carried by this error, if any.
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            Self::ProviderError { kind, .. } => Some(*kind),
            Self::GenerationError { kind, .. } => *kind,
            _ => None,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.provider_kind().is_some_and(ProviderErrorKind::is_retryable)
    }

    /// Whether this error should stop a batch instead of moving on to the
    /// next document.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::PartialIndexError { failures, .. } | Self::IndexError { failures, .. } => {
                failures.iter().any(|f| f.kind.is_some_and(ProviderErrorKind::is_fatal))
            }
            _ => self.provider_kind().is_some_and(ProviderErrorKind::is_fatal),
        }
    }

    /// Indices of the chunks that failed, for index errors.
    pub fn failed_chunks(&self) -> Vec<usize> {
        match self {
            Self::PartialIndexError { failures, .. } | Self::IndexError { failures, .. } => {
                failures.iter().map(|f| f.chunk_index).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// A convenience result type for knowledge-base operations.
pub type Result<T> = std::result::Result<T, RagError>;

//! Similarity retrieval with citation-tagged context assembly.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{RagConfig, RetryPolicy};
use crate::document::{MetadataFilter, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::retry::with_retry;
use crate::vectorstore::VectorIndex;

/// Separator placed between context entries.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Characters reserved per entry for the newline, citation marker and
/// similarity suffix that follow a chunk's content.
pub const CONTEXT_ENTRY_OVERHEAD: usize = 128;

/// Context assembled for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    /// Formatted entries, each followed by its citation marker.
    pub text: String,
    /// The results included in `text`, most similar first.
    pub sources: Vec<SearchResult>,
    /// Lower-ranked results left out because of the character budget.
    pub dropped: usize,
}

impl RetrievedContext {
    /// True when no result cleared the threshold and the budget.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Length of `text` in characters.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Render one result as `content`, marker and similarity.
pub fn format_entry(result: &SearchResult) -> String {
    format!(
        "{}\n{} (similarity: {:.2})",
        result.content,
        result.citation(),
        result.similarity_score
    )
}

/// Join results in rank order until the next entry would exceed `max_chars`.
///
/// The entry that does not fit and every entry after it are dropped whole.
pub fn assemble_context(results: Vec<SearchResult>, max_chars: usize) -> RetrievedContext {
    let separator_chars = CONTEXT_SEPARATOR.chars().count();
    let total = results.len();
    let mut context = RetrievedContext::default();
    let mut used = 0;

    for result in results {
        let entry = format_entry(&result);
        let separator = if context.sources.is_empty() { 0 } else { separator_chars };
        let cost = entry.chars().count() + separator;
        if used + cost > max_chars {
            break;
        }
        if !context.sources.is_empty() {
            context.text.push_str(CONTEXT_SEPARATOR);
        }
        context.text.push_str(&entry);
        context.sources.push(result);
        used += cost;
    }

    context.dropped = total - context.sources.len();
    context
}

/// Issues filtered similarity queries and formats the hits with citations.
///
/// # Example
///
/// ```rust,ignore
/// let retriever = Retriever::new(embedder, index, &config);
/// let filter = MetadataFilter::tenant("acme");
/// let context = retriever.retrieve("past DoD contracts", 5, &filter, 0.7).await?;
/// if context.is_empty() {
///     // nothing relevant in the knowledge base
/// }
/// ```
pub struct Retriever {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    max_context_length: usize,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        config: &RagConfig,
    ) -> Self {
        Self {
            embedding_provider,
            index,
            max_context_length: config.max_context_length,
            retry: config.retry.clone(),
        }
    }

    /// Embed `query`, run the filtered similarity query and assemble context.
    ///
    /// An empty [`RetrievedContext`] is a normal outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for a blank query, `top_k == 0` or a
    /// threshold outside `[-1, 1]`, and propagates provider and index errors.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: &MetadataFilter,
        similarity_threshold: f32,
    ) -> Result<RetrievedContext> {
        if query.trim().is_empty() {
            return Err(RagError::ConfigError("query must not be empty".to_string()));
        }
        if top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if !(-1.0..=1.0).contains(&similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "similarity_threshold ({similarity_threshold}) must be within [-1, 1]"
            )));
        }

        let provider = self.embedding_provider.name();
        let embedding = with_retry(&self.retry, provider, "query embedding", || {
            self.embedding_provider.embed(query)
        })
        .await
        .map_err(|e| {
            error!(error = %e, "embedding failed during query");
            e
        })?;

        let results =
            self.index.query(&embedding, top_k, filter, similarity_threshold).await.map_err(|e| {
                error!(backend = self.index.backend(), error = %e, "vector index query failed");
                e
            })?;

        let context = assemble_context(results, self.max_context_length);
        info!(
            tenant = %filter.tenant_id,
            result_count = context.sources.len(),
            dropped = context.dropped,
            context_chars = context.char_count(),
            "retrieval completed"
        );
        Ok(context)
    }

    /// Like [`retrieve`](Self::retrieve), returning only the formatted text.
    ///
    /// The string is empty when nothing relevant was found.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &MetadataFilter,
        similarity_threshold: f32,
    ) -> Result<String> {
        Ok(self.retrieve(query, top_k, filter, similarity_threshold).await?.text)
    }
}

//! Grounded question answering over retrieved knowledge-base context.
//!
//! The answerer never calls the generation provider without context. When
//! retrieval comes back empty it answers with [`INSUFFICIENT_INFORMATION`] at
//! `Low` confidence instead.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{error, info, warn};

use crate::config::{AnswerConfig, RagConfig, RetryPolicy};
use crate::document::{Citation, Confidence, DocumentId, GroundedAnswer, MetadataFilter};
use crate::error::{RagError, Result};
use crate::generation::TextGenerationProvider;
use crate::retriever::{RetrievedContext, Retriever};
use crate::retry::with_retry;

/// Answer returned when no retrieved context supports the question.
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have sufficient information in the knowledge base to answer this question.";

static CITATION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[KB:Doc#([^\[\]]+?)_Chunk#(\d+)\]")
        .expect("unreachable error: failed to compile citation marker pattern")
});

/// Extract citation markers from generated text, in order of first appearance.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let mut seen = HashSet::new();
    CITATION_MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let chunk_index = caps[2].parse().ok()?;
            Some(Citation { document_id: DocumentId::new(&caps[1]), chunk_index })
        })
        .filter(|citation| seen.insert(citation.clone()))
        .collect()
}

/// Build the generation prompt around retrieved context.
pub fn compose_prompt(question: &str, context: &str) -> String {
    format!(
        "You answer questions using only the verified knowledge-base excerpts below.\n\
         \n\
         Rules:\n\
         - Use only facts stated in the excerpts. Do not rely on outside knowledge.\n\
         - After every statement, cite the excerpt it comes from using the marker that follows \
         that excerpt, copied exactly, for example [KB:Doc#123_Chunk#0].\n\
         - If the excerpts do not contain enough information to answer the question or part of \
         it, say so explicitly for that part instead of guessing.\n\
         \n\
         Knowledge-base excerpts:\n\
         {context}\n\
         \n\
         Question: {question}\n\
         \n\
         Answer:"
    )
}

/// Map context volume and citations to a confidence level.
pub fn assess_confidence(
    context_chars: usize,
    citation_count: usize,
    config: &AnswerConfig,
) -> Confidence {
    if citation_count == 0 {
        Confidence::Low
    } else if context_chars > config.high_confidence_chars {
        Confidence::High
    } else if context_chars > config.medium_confidence_chars {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Answers questions strictly from retrieved context, with citations.
pub struct GroundedAnswerer {
    retriever: Arc<Retriever>,
    generator: Arc<dyn TextGenerationProvider>,
    top_k: usize,
    similarity_threshold: f32,
    answer: AnswerConfig,
    retry: RetryPolicy,
}

impl GroundedAnswerer {
    pub fn new(
        retriever: Arc<Retriever>,
        generator: Arc<dyn TextGenerationProvider>,
        config: &RagConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
            answer: config.answer.clone(),
            retry: config.retry.clone(),
        }
    }

    /// Answer `question` from the chunks visible through `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationError`] if the provider fails after
    /// retries or returns nothing, and propagates retrieval errors.
    pub async fn answer(&self, question: &str, filter: &MetadataFilter) -> Result<GroundedAnswer> {
        let context =
            self.retriever.retrieve(question, self.top_k, filter, self.similarity_threshold).await?;
        if context.is_empty() {
            info!(
                tenant = %filter.tenant_id,
                "no context cleared the threshold, declining to generate"
            );
            return Ok(GroundedAnswer {
                answer_text: INSUFFICIENT_INFORMATION.to_string(),
                citations: Vec::new(),
                confidence: Confidence::Low,
                context_chars_used: 0,
            });
        }

        let prompt = compose_prompt(question, &context.text);
        let answer_text = self.generate(&prompt).await?;
        let citations = supported_citations(&answer_text, &context);
        let context_chars_used = context.char_count();
        let confidence = assess_confidence(context_chars_used, citations.len(), &self.answer);

        info!(
            tenant = %filter.tenant_id,
            sources = context.sources.len(),
            citations = citations.len(),
            ?confidence,
            context_chars_used,
            "grounded answer generated"
        );
        Ok(GroundedAnswer { answer_text, citations, confidence, context_chars_used })
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let provider = self.generator.name();
        let text = with_retry(&self.retry, provider, "completion", || {
            self.generator.complete(prompt, self.answer.max_tokens, self.answer.temperature)
        })
        .await
        .map_err(|e| {
            error!(provider, error = %e, "grounded answer generation failed");
            RagError::GenerationError { kind: e.provider_kind(), message: e.to_string() }
        })?;

        if text.trim().is_empty() {
            error!(provider, "generation provider returned an empty completion");
            return Err(RagError::GenerationError {
                kind: None,
                message: format!("{provider} returned an empty completion"),
            });
        }
        Ok(text)
    }
}

/// Citations in `text` that refer to chunks actually supplied in `context`.
fn supported_citations(text: &str, context: &RetrievedContext) -> Vec<Citation> {
    let supplied: HashSet<Citation> = context.sources.iter().map(|s| s.citation()).collect();
    extract_citations(text)
        .into_iter()
        .filter(|citation| {
            let known = supplied.contains(citation);
            if !known {
                warn!(%citation, "discarding citation to a chunk that was not in the context");
            }
            known
        })
        .collect()
}

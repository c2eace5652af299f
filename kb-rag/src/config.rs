//! Configuration for indexing, retrieval and grounded answering.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retriever::CONTEXT_ENTRY_OVERHEAD;

/// Configuration parameters for the knowledge-base engine.
///
/// Deserialization fills missing fields from [`Default`]; use
/// [`RagConfig::from_json`] or the builder to get a validated value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of top results to return from vector search.
    pub top_k: usize,
    /// Minimum similarity score for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Character budget for the context handed to the generation provider.
    pub max_context_length: usize,
    /// Maximum number of embedding calls in flight.
    pub max_concurrency: usize,
    /// Grounded answer generation settings.
    pub answer: AnswerConfig,
    /// Timeout and retry policy for every provider call.
    pub retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 5,
            similarity_threshold: 0.7,
            max_context_length: 4000,
            max_concurrency: 4,
            answer: AnswerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Settings for the text-generation step of a grounded answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnswerConfig {
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Sampling temperature. Kept low: this path reports facts.
    pub temperature: f32,
    /// Context length (characters) above which a cited answer is `High` confidence.
    pub high_confidence_chars: usize,
    /// Context length (characters) above which a cited answer is `Medium` confidence.
    pub medium_confidence_chars: usize,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.3,
            high_confidence_chars: 2000,
            medium_confidence_chars: 500,
        }
    }
}

/// Timeout and bounded exponential backoff for provider calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    pub initial_backoff_ms: u64,
    /// Cap on the delay between attempts.
    pub max_backoff_ms: u64,
    /// Per-attempt timeout.
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 500, max_backoff_ms: 8000, timeout_ms: 30_000 }
    }
}

impl RetryPolicy {
    /// Per-attempt timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Parse a JSON document over the defaults and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the JSON is malformed or the
    /// resulting values are inconsistent.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RagError::ConfigError(format!("invalid configuration JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that all parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "similarity_threshold ({}) must be within [-1, 1]",
                self.similarity_threshold
            )));
        }
        if self.chunk_size + CONTEXT_ENTRY_OVERHEAD > self.max_context_length {
            return Err(RagError::ConfigError(format!(
                "max_context_length ({}) must leave room for one chunk ({}) plus its \
                 citation marker ({CONTEXT_ENTRY_OVERHEAD})",
                self.max_context_length, self.chunk_size
            )));
        }
        if self.max_concurrency == 0 {
            return Err(RagError::ConfigError(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }

        let answer = &self.answer;
        if answer.max_tokens == 0 {
            return Err(RagError::ConfigError(
                "answer.max_tokens must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&answer.temperature) {
            return Err(RagError::ConfigError(format!(
                "answer.temperature ({}) must be within [0, 1]",
                answer.temperature
            )));
        }
        if answer.medium_confidence_chars > answer.high_confidence_chars {
            return Err(RagError::ConfigError(format!(
                "answer.medium_confidence_chars ({}) must not exceed \
                 answer.high_confidence_chars ({})",
                answer.medium_confidence_chars, answer.high_confidence_chars
            )));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(RagError::ConfigError("retry.max_attempts must be at least 1".to_string()));
        }
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            return Err(RagError::ConfigError(format!(
                "retry.max_backoff_ms ({}) must not be below retry.initial_backoff_ms ({})",
                retry.max_backoff_ms, retry.initial_backoff_ms
            )));
        }
        if retry.timeout_ms == 0 {
            return Err(RagError::ConfigError(
                "retry.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of top results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the character budget for retrieved context.
    pub fn max_context_length(mut self, length: usize) -> Self {
        self.config.max_context_length = length;
        self
    }

    /// Set the maximum number of concurrent embedding calls.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config.max_concurrency = limit;
        self
    }

    /// Replace the answer generation settings.
    pub fn answer(mut self, answer: AnswerConfig) -> Self {
        self.config.answer = answer;
        self
    }

    /// Replace the provider retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if, among others:
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `similarity_threshold` is outside `[-1, 1]`
    /// - a full chunk and its citation marker exceed `max_context_length`
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

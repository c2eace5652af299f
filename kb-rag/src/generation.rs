//! Text-generation provider trait used for grounded answers.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that completes a prompt with generated text.
///
/// Like [`EmbeddingProvider`](crate::EmbeddingProvider), failures are reported
/// as classified provider errors; the answerer applies the retry policy and
/// never substitutes text of its own when the provider fails.
#[async_trait]
pub trait TextGenerationProvider: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &str {
        "generation"
    }

    /// Complete `prompt`, producing at most `max_tokens` tokens.
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String>;
}

//! OpenAI embedding and chat-completion providers.
//!
//! This module is only available when the `openai` feature is enabled. Both
//! providers accept any OpenAI-compatible endpoint via `with_base_url`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderErrorKind, RagError, Result};
use crate::generation::TextGenerationProvider;

const PROVIDER: &str = "openai";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// The default dimensionality for `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;

const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Map an HTTP error status (and its body) to a provider error kind.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> ProviderErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderErrorKind::Authentication,
        StatusCode::TOO_MANY_REQUESTS if body.contains("insufficient_quota") => {
            ProviderErrorKind::QuotaExceeded
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderErrorKind::RateLimited,
        StatusCode::REQUEST_TIMEOUT => ProviderErrorKind::Timeout,
        s if s.is_server_error() => ProviderErrorKind::Network,
        _ => ProviderErrorKind::InvalidRequest,
    }
}

fn classify_transport(e: &reqwest::Error) -> ProviderErrorKind {
    if e.is_timeout() {
        ProviderErrorKind::Timeout
    } else if e.is_decode() {
        ProviderErrorKind::InvalidResponse
    } else {
        ProviderErrorKind::Network
    }
}

fn api_key_from_env() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| RagError::ConfigError("OPENAI_API_KEY environment variable not set".into()))
}

fn check_api_key(api_key: &str) -> Result<()> {
    if api_key.trim().is_empty() {
        return Err(RagError::ConfigError("OpenAI API key must not be empty".into()));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// POST `body` as JSON and decode the response, classifying every failure.
async fn post_json<Req, Resp>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &Req,
) -> Result<Resp>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let response = client.post(url).bearer_auth(api_key).json(body).send().await.map_err(|e| {
        error!(provider = PROVIDER, error = %e, "request failed");
        RagError::provider(PROVIDER, classify_transport(&e), format!("request failed: {e}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let kind = classify_status(status, &body);
        let detail =
            serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
        error!(provider = PROVIDER, %status, %kind, "API error");
        return Err(RagError::provider(PROVIDER, kind, format!("API returned {status}: {detail}")));
    }

    response.json().await.map_err(|e| {
        error!(provider = PROVIDER, error = %e, "failed to parse response");
        RagError::provider(
            PROVIDER,
            ProviderErrorKind::InvalidResponse,
            format!("failed to parse response: {e}"),
        )
    })
}

/// An [`EmbeddingProvider`] backed by the OpenAI embeddings API.
///
/// # Configuration
///
/// - `model` – defaults to `text-embedding-3-small`.
/// - `dimensions` – optional Matryoshka dimension override.
/// - `api_key` – from the constructor or the `OPENAI_API_KEY` environment variable.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::from_env()?.with_dimensions(768);
/// let embedding = provider.embed("past performance on DoD contracts").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    /// If set, passed to the API for Matryoshka dimension truncation.
    request_dimensions: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider with the default model and dimensions (1536).
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        check_api_key(&api_key)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensions (Matryoshka support).
    ///
    /// This also updates the value returned by [`dimensions()`](EmbeddingProvider::dimensions).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// Point at an OpenAI-compatible server, e.g. `http://localhost:8080/v1`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = PROVIDER, text_len = text.len(), "embedding single text");
        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| {
            let kind = ProviderErrorKind::InvalidResponse;
            RagError::provider(PROVIDER, kind, "API returned no embedding")
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            provider = PROVIDER,
            batch_size = texts.len(),
            model = %self.model,
            "embedding batch"
        );

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };
        let url = format!("{}/embeddings", self.base_url);
        let mut response: EmbeddingResponse =
            post_json(&self.client, &url, &self.api_key, &request).await?;

        if response.data.len() != texts.len() {
            return Err(RagError::provider(
                PROVIDER,
                ProviderErrorKind::InvalidResponse,
                format!("requested {} embeddings, received {}", texts.len(), response.data.len()),
            ));
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// A [`TextGenerationProvider`] backed by the OpenAI chat-completions API.
///
/// The prompt is sent as a single user message.
pub struct OpenAIChatProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAIChatProvider {
    /// Create a provider using `gpt-4o-mini`.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        check_api_key(&api_key)?;
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_CHAT_MODEL.into(),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[async_trait]
impl TextGenerationProvider for OpenAIChatProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String> {
        debug!(
            provider = PROVIDER,
            model = %self.model,
            prompt_len = prompt.len(),
            max_tokens,
            "chat completion"
        );

        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            max_tokens,
            temperature,
        };
        let url = format!("{}/chat/completions", self.base_url);
        let response: ChatResponse = post_json(&self.client, &url, &self.api_key, &request).await?;

        let completion =
            response.choices.into_iter().next().and_then(|choice| choice.message.content);
        completion.ok_or_else(|| {
            let kind = ProviderErrorKind::InvalidResponse;
            RagError::provider(PROVIDER, kind, "API returned no completion")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let quota = r#"{"error":{"code":"insufficient_quota"}}"#;
        let auth = ProviderErrorKind::Authentication;
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED, ""), auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN, ""), auth);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, quota),
            ProviderErrorKind::QuotaExceeded
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ProviderErrorKind::RateLimited
        );
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY, ""), ProviderErrorKind::Network);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST, ""), ProviderErrorKind::InvalidRequest);
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(OpenAIEmbeddingProvider::new("  "), Err(RagError::ConfigError(_))));
        assert!(matches!(OpenAIChatProvider::new(""), Err(RagError::ConfigError(_))));
    }

    #[test]
    fn builder_settings() {
        let provider = OpenAIEmbeddingProvider::new("sk-test")
            .unwrap()
            .with_dimensions(256)
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(provider.dimensions(), 256);
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn chat_request_shape() {
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: [ChatMessage { role: "user", content: "hi" }],
            max_tokens: 10,
            temperature: 0.3,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 10);
    }
}

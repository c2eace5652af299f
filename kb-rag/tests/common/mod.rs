//! Deterministic providers shared by the integration tests.

#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kb_rag::{
    CancellationToken, Chunker, EmbeddingProvider, ProviderErrorKind, RagError, Result,
    TextGenerationProvider, extract_citations,
};

pub const DIM: usize = 64;

/// Marker that makes [`FailingEmbedder`] reject a chunk.
pub const POISON: &str = "POISON";

/// Bag-of-words embedder: each lowercase word adds weight to a hashed bucket.
///
/// Texts sharing words have a positive cosine similarity; texts sharing
/// none are orthogonal.
#[derive(Debug, Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn hash_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIM];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        vector[(hasher.finish() % DIM as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        vector[0] = 1.0;
    } else {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_embedding(text))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Embeds like [`HashEmbedder`] but fails every text containing [`POISON`]
/// until [`heal`](Self::heal) is called.
#[derive(Debug)]
pub struct FailingEmbedder {
    kind: ProviderErrorKind,
    calls: AtomicUsize,
    healed: AtomicBool,
}

impl FailingEmbedder {
    pub fn new(kind: ProviderErrorKind) -> Self {
        Self { kind, calls: AtomicUsize::new(0), healed: AtomicBool::new(false) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stop failing poisoned texts.
    pub fn heal(&self) {
        self.healed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(POISON) && !self.healed.load(Ordering::SeqCst) {
            return Err(RagError::provider("failing", self.kind, "poisoned input"));
        }
        Ok(hash_embedding(text))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Fails the first `failures` calls with a retryable error, then succeeds.
#[derive(Debug)]
pub struct FlakyEmbedder {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(failures: usize) -> Self {
        Self { failures, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(RagError::provider("flaky", ProviderErrorKind::RateLimited, "slow down"));
        }
        Ok(hash_embedding(text))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Sleeps on every call and records the highest number of calls in flight.
#[derive(Debug, Default)]
pub struct SlowEmbedder {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowEmbedder {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(hash_embedding(text))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// Cancels `token` as soon as it embeds a text containing `marker`.
#[derive(Debug)]
pub struct CancellingEmbedder {
    pub token: CancellationToken,
    pub marker: &'static str,
}

#[async_trait]
impl EmbeddingProvider for CancellingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains(self.marker) {
            self.token.cancel();
        }
        Ok(hash_embedding(text))
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

/// What [`RecordingGenerator`] answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A fixed completion.
    Text(String),
    /// Repeat every citation marker found in the prompt.
    CiteContext,
    /// Fail with a provider error of this kind.
    Fail(ProviderErrorKind),
}

/// Text generator that counts calls and keeps the last prompt.
#[derive(Debug)]
pub struct RecordingGenerator {
    reply: Reply,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl RecordingGenerator {
    pub fn new(reply: Reply) -> Self {
        Self { reply, calls: AtomicUsize::new(0), last_prompt: Mutex::new(None) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerationProvider for RecordingGenerator {
    fn name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::CiteContext => {
                let markers: Vec<String> =
                    extract_citations(prompt).iter().map(ToString::to_string).collect();
                Ok(format!("According to the knowledge base {}.", markers.join(" ")))
            }
            Reply::Fail(kind) => Err(RagError::provider("recording", *kind, "generation refused")),
        }
    }
}

/// Splits on blank lines, so tests control chunk boundaries exactly.
#[derive(Debug, Default)]
pub struct ParagraphChunker;

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect()
    }
}

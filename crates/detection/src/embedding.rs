//! 768-dimensional embedding service with a process-local cache and a
//! deterministic fallback: a real provider is tried first on every miss,
//! and only when it's absent or errors does the same text fall back to a
//! vector built from word, bigram, and trigram hash features rather than a
//! real semantic embedding.

use dashmap::DashMap;
use qa_core::traits::LlmProvider;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const EMBEDDING_DIM: usize = 768;

fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Builds a 768-dim vector purely from hashed lexical features of `text`:
/// words hash into dims 0-255, character bigrams into 256-511, character
/// trigrams into 512-767. Never to be mistaken for a real semantic
/// embedding by downstream consumers.
pub struct FallbackEmbedder;

impl FallbackEmbedder {
    pub fn embed(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; EMBEDDING_DIM];
        let lowered = text.to_lowercase();

        for word in lowered.split_whitespace() {
            let idx = (stable_hash(word) % 256) as usize;
            vector[idx] += 1.0;
        }

        let chars: Vec<char> = lowered.chars().collect();
        for window in chars.windows(2) {
            let bigram: String = window.iter().collect();
            let idx = 256 + (stable_hash(&bigram) % 256) as usize;
            vector[idx] += 0.5;
        }
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let idx = 512 + (stable_hash(&trigram) % 256) as usize;
            vector[idx] += 0.3;
        }

        l2_normalize(&mut vector);
        vector
    }
}

/// Cosine similarity for already-normalized vectors reduces to a dot
/// product; clamped to `[0,1]` since real embedding providers occasionally
/// produce slightly-off-unit vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    dot.clamp(0.0, 1.0)
}

/// `embed`/`similarity` contract with a process-local cache keyed by text
/// hash, and a flag exposing whether the last attempt at a real provider
/// succeeded. With no provider configured, every call goes straight to the
/// fallback and the flag stays `false`.
pub struct EmbeddingService {
    cache: DashMap<u64, Vec<f32>>,
    provider: Option<Arc<dyn LlmProvider>>,
    api_available: AtomicBool,
}

impl Default for EmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingService {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            provider: None,
            api_available: AtomicBool::new(false),
        }
    }

    /// Wires in a real embedding provider. Every `embed` call attempts it
    /// first and only falls back to the hash-based vector on error.
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            cache: DashMap::new(),
            provider: Some(provider),
            api_available: AtomicBool::new(false),
        }
    }

    pub fn is_api_available(&self) -> bool {
        self.api_available.load(Ordering::Relaxed)
    }

    /// Returns the embedding for `text`, computing it once even under
    /// concurrent demand because `DashMap::entry` keys the computation on
    /// the text hash. Tries the configured provider first; a missing
    /// provider or a failed call falls back to the deterministic
    /// hash-based vector rather than propagating the error, since
    /// detection must still produce a result.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        let key = stable_hash(text);
        if let Some(existing) = self.cache.get(&key) {
            return existing.clone();
        }

        let vector = match &self.provider {
            Some(provider) => match provider.embed(text).await {
                Ok(mut vector) if !vector.is_empty() => {
                    self.api_available.store(true, Ordering::Relaxed);
                    l2_normalize(&mut vector);
                    vector
                }
                Ok(_) => {
                    tracing::warn!("embedding provider returned an empty vector, using fallback");
                    self.api_available.store(false, Ordering::Relaxed);
                    FallbackEmbedder::embed(text)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "embedding provider call failed, using fallback");
                    self.api_available.store(false, Ordering::Relaxed);
                    FallbackEmbedder::embed(text)
                }
            },
            None => FallbackEmbedder::embed(text),
        };

        self.cache.insert(key, vector.clone());
        vector
    }

    pub async fn similarity(&self, a: &str, b: &str) -> f32 {
        cosine_similarity(&self.embed(a).await, &self.embed(b).await)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let a = FallbackEmbedder::embed("thank you for calling");
        let b = FallbackEmbedder::embed("thank you for calling");
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_is_unit_length() {
        let v = FallbackEmbedder::embed("verify your account");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[tokio::test]
    async fn similarity_of_identical_text_is_near_one() {
        let service = EmbeddingService::new();
        let sim = service.similarity("hello there", "hello there").await;
        assert!(sim > 0.99);
    }

    #[tokio::test]
    async fn cache_is_populated_after_first_embed() {
        let service = EmbeddingService::new();
        assert!(service.cache.is_empty());
        service.embed("hello").await;
        assert_eq!(service.cache.len(), 1);
        service.embed("hello").await;
        assert_eq!(service.cache.len(), 1);
    }

    struct ErrProvider;

    #[async_trait::async_trait]
    impl LlmProvider for ErrProvider {
        async fn generate(&self, _prompt: &str, _schema: &serde_json::Value, _params: &serde_json::Value) -> qa_core::error::Result<qa_core::traits::LlmResponse> {
            Err(qa_core::error::Error::internal("not implemented"))
        }

        async fn embed(&self, _text: &str) -> qa_core::error::Result<Vec<f32>> {
            Err(qa_core::error::Error::internal("provider unavailable"))
        }
    }

    struct OkProvider;

    #[async_trait::async_trait]
    impl LlmProvider for OkProvider {
        async fn generate(&self, _prompt: &str, _schema: &serde_json::Value, _params: &serde_json::Value) -> qa_core::error::Result<qa_core::traits::LlmResponse> {
            Err(qa_core::error::Error::internal("not implemented"))
        }

        async fn embed(&self, _text: &str) -> qa_core::error::Result<Vec<f32>> {
            Ok(vec![1.0; EMBEDDING_DIM])
        }
    }

    #[tokio::test]
    async fn falls_back_when_provider_errors() {
        let service = EmbeddingService::with_provider(Arc::new(ErrProvider));
        let vector = service.embed("hello there").await;
        assert_eq!(vector, FallbackEmbedder::embed("hello there"));
        assert!(!service.is_api_available());
    }

    #[tokio::test]
    async fn uses_provider_vector_and_marks_available_on_success() {
        let service = EmbeddingService::with_provider(Arc::new(OkProvider));
        let vector = service.embed("hello there").await;
        assert_ne!(vector, FallbackEmbedder::embed("hello there"));
        assert!(service.is_api_available());
    }
}

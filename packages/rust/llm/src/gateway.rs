//! Cache read-through and retry around a [`TextGenerator`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use repotutor_shared::{AppConfig, CacheStats};
use repotutor_storage::ResponseCache;

use crate::error::LlmError;
use crate::retry::RetryPolicy;
use crate::types::{GenerationParams, GenerationRequest, TextGenerator};

/// Deterministic cache key for a request: SHA-256 over model, prompt and sampling params.
pub fn fingerprint(request: &GenerationRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.params.model.as_bytes());
    hasher.update([0u8]);
    hasher.update(request.params.max_tokens.to_le_bytes());
    hasher.update(request.params.temperature.to_bits().to_le_bytes());
    hasher.update([0u8]);
    hasher.update(request.prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The single entry point every stage uses to reach the text generation service.
///
/// Shared across workers behind an `Arc`; the cache is the only shared state.
pub struct Gateway {
    generator: Arc<dyn TextGenerator>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
    params: GenerationParams,
    /// Hard ceiling per attempt, applied on top of the generator's own timeout.
    attempt_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    calls: AtomicU64,
}

impl Gateway {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        cache: Arc<ResponseCache>,
        params: GenerationParams,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            cache,
            retry,
            params,
            attempt_timeout: Duration::from_secs(600),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Build with parameters from the `[openrouter]` config section.
    pub fn from_config(
        config: &AppConfig,
        model: Option<String>,
        generator: Arc<dyn TextGenerator>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        let params = GenerationParams {
            model: model.unwrap_or_else(|| config.openrouter.default_model.clone()),
            max_tokens: config.openrouter.max_tokens,
            temperature: config.openrouter.temperature,
        };
        let retry = RetryPolicy::with_max_attempts(config.openrouter.max_attempts);
        // Leave headroom over the HTTP timeout so the client reports it first.
        let attempt_timeout = Duration::from_secs(config.openrouter.timeout_secs + 30);
        Self::new(generator, cache, params, retry).with_attempt_timeout(attempt_timeout)
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.params.model
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    /// Request for `prompt` with the gateway's default parameters.
    pub fn request(&self, prompt: impl Into<String>) -> GenerationRequest {
        GenerationRequest::new(prompt, self.params.clone())
    }

    /// Generate text for `prompt` with the default parameters.
    pub async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate_request(&self.request(prompt)).await
    }

    /// Cache lookup, then bounded retries. Only a successful response is cached.
    pub async fn generate_request(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let key = fingerprint(request);

        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %&key[..12], "response cache hit");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "response cache read failed, treating as miss"),
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let response = self
            .retry
            .run(self.generator.name(), |attempt| async move {
                self.calls.fetch_add(1, Ordering::Relaxed);
                debug!(attempt, model = %request.params.model, "calling text generator");
                match tokio::time::timeout(self.attempt_timeout, self.generator.generate(request))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(LlmError::Timeout {
                        duration: self.attempt_timeout,
                    }),
                }
            })
            .await?;

        if let Err(e) = self
            .cache
            .put(&key, &request.params.model, &response)
            .await
        {
            warn!(error = %e, "response cache write failed");
        }

        Ok(response)
    }

    /// Counters since construction.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
        }
    }
}

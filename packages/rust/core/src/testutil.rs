//! Helpers for stage tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use repotutor_llm::fake::ScriptedGenerator;
use repotutor_llm::{Gateway, GenerationParams, RetryPolicy};
use repotutor_storage::ResponseCache;

pub(crate) fn params() -> GenerationParams {
    GenerationParams {
        model: "test/model".into(),
        max_tokens: 512,
        temperature: 0.2,
    }
}

pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

/// Uncached gateway over `generator` with millisecond backoff.
pub(crate) fn gateway(generator: Arc<ScriptedGenerator>) -> Gateway {
    Gateway::new(
        generator,
        Arc::new(ResponseCache::disabled()),
        params(),
        fast_retry(),
    )
}

/// Fresh directory under the system temp dir.
pub(crate) fn temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rt-{label}-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

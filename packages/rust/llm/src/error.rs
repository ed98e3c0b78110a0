//! Error taxonomy for text generation calls.

use std::time::Duration;

use repotutor_shared::RepoTutorError;

/// Failure of a single text generation attempt.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request timed out after {}s", duration.as_secs())]
    Timeout { duration: Duration },

    /// HTTP 429 from the provider.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// HTTP 5xx from the provider.
    #[error("provider outage: {0}")]
    ProviderOutage(String),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP 401/403.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Other HTTP 4xx; the request itself is wrong.
    #[error("request rejected: {0}")]
    InvalidRequest(String),

    /// A 2xx response without usable content.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("misconfiguration: {0}")]
    Misconfiguration(String),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::RateLimited(_)
                | Self::ProviderOutage(_)
                | Self::Transport(_)
                | Self::InvalidResponse(_)
        )
    }
}

impl From<LlmError> for RepoTutorError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Auth(msg) => RepoTutorError::Auth(format!("text generation service: {msg}")),
            LlmError::Misconfiguration(msg) => RepoTutorError::config(msg),
            other => RepoTutorError::Generation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LlmError::Timeout { duration: Duration::from_secs(1) }.is_transient());
        assert!(LlmError::RateLimited("429".into()).is_transient());
        assert!(LlmError::ProviderOutage("502".into()).is_transient());
        assert!(!LlmError::Auth("401".into()).is_transient());
        assert!(!LlmError::InvalidRequest("400".into()).is_transient());
    }

    #[test]
    fn converts_into_workspace_error() {
        let err: RepoTutorError = LlmError::Auth("bad key".into()).into();
        assert!(matches!(err, RepoTutorError::Auth(_)));

        let err: RepoTutorError = LlmError::Timeout { duration: Duration::from_secs(3) }.into();
        assert_eq!(err.to_string(), "generation error: request timed out after 3s");
    }
}

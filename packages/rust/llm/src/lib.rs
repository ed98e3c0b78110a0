//! Text generation gateway for RepoTutor.
//!
//! - [`TextGenerator`], the prompt-in/text-out capability
//! - [`OpenRouterClient`], the live implementation
//! - [`Gateway`], which adds fingerprinted caching and bounded retries
//! - [`LlmError`], with transient/permanent classification

pub mod error;
pub mod gateway;
pub mod openrouter;
pub mod retry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use error::LlmError;
pub use gateway::{Gateway, fingerprint};
pub use openrouter::OpenRouterClient;
pub use retry::RetryPolicy;
pub use types::{GenerationParams, GenerationRequest, TextGenerator};

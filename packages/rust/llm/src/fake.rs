//! Scripted [`TextGenerator`] for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::types::{GenerationRequest, TextGenerator};

type Responder = Box<dyn Fn(&GenerationRequest) -> Result<String, LlmError> + Send + Sync>;
type Delay = Box<dyn Fn(&GenerationRequest) -> Duration + Send + Sync>;

/// Replays scripted outcomes in order, then falls back to a responder.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    responder: Option<Responder>,
    delay: Option<Delay>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            responder: None,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answers every prompt with `echo: {prompt}`.
    pub fn echo() -> Self {
        Self::responding(|req| Ok(format!("echo: {}", req.prompt)))
    }

    /// Answers every prompt through `f`.
    pub fn responding<F>(f: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self::new(Vec::new()).with_responder(f)
    }

    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_for(move |_| delay)
    }

    /// Sleep for `f(request)` before answering each request.
    pub fn with_delay_for<F>(mut self, f: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(f));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(request)).await;
        }

        let scripted = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (scripted, &self.responder) {
            (Some(outcome), _) => outcome,
            (None, Some(responder)) => responder(request),
            (None, None) => Err(LlmError::InvalidRequest("script exhausted".into())),
        }
    }
}

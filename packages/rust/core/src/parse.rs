//! Tolerant parsing of structured answers from the text generation service.
//!
//! Answers are expected to carry one JSON value, either inside a fenced
//! block or inline in surrounding prose. Anything else is reported as
//! [`ParseOutcome::Malformed`] and earns exactly one stricter re-prompt.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use repotutor_llm::Gateway;
use repotutor_shared::{RepoTutorError, Result, Stage};

/// Appended to a prompt after a malformed answer.
const STRICT_FORMAT_NOTE: &str = "IMPORTANT: Reply with ONLY the JSON value inside a single ```json fenced block. \
No commentary before or after it. Use integer indices exactly as listed above.";

/// Result of interpreting a raw answer.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    Parsed(T),
    Malformed { raw: String, reason: String },
}

impl<T> ParseOutcome<T> {
    pub fn malformed(raw: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Pull the first JSON value out of `raw`.
///
/// A fenced block (```` ```json ```` or bare ```` ``` ````) wins over inline JSON.
pub fn extract_json(raw: &str) -> Option<Value> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n(.*?)\r?\n[ \t]*```").expect("valid regex")
    });

    for caps in FENCE_RE.captures_iter(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Some(value);
        }
    }

    for (pos, c) in raw.char_indices() {
        if c != '{' && c != '[' {
            continue;
        }
        let mut stream = serde_json::Deserializer::from_str(&raw[pos..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            return Some(value);
        }
    }

    None
}

/// Read an index given as `3`, `"3"` or `"3 # src/app.py"`.
pub fn parse_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.split('#').next()?.trim().parse().ok(),
        _ => None,
    }
}

/// Non-empty trimmed string field of a JSON object.
pub(crate) fn string_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Generate, parse, and re-prompt once with a stricter format on a malformed answer.
///
/// A second malformed answer, or any unrecovered generation error, is fatal.
pub(crate) async fn generate_parsed<T, F>(
    gateway: &Gateway,
    stage: Stage,
    prompt: &str,
    parse: F,
) -> Result<T>
where
    F: Fn(&str) -> ParseOutcome<T>,
{
    let raw = gateway.generate(prompt).await?;
    let reason = match parse(&raw) {
        ParseOutcome::Parsed(value) => return Ok(value),
        ParseOutcome::Malformed { reason, .. } => reason,
    };

    warn!(%stage, %reason, "malformed response, re-prompting with stricter format");
    let strict = format!(
        "{prompt}\n\n{STRICT_FORMAT_NOTE}\nYour previous answer could not be used: {reason}."
    );

    let raw = gateway.generate(&strict).await?;
    match parse(&raw) {
        ParseOutcome::Parsed(value) => Ok(value),
        ParseOutcome::Malformed { raw, reason } => Err(RepoTutorError::parse(format!(
            "{stage}: malformed response after re-prompt: {reason} (got: {})",
            preview(&raw)
        ))),
    }
}

fn preview(raw: &str) -> String {
    let mut out: String = raw.chars().take(200).collect();
    if out.len() < raw.len() {
        out.push_str("...");
    }
    out
}

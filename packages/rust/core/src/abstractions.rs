//! Abstraction extraction: the first generation stage.
//!
//! One prompt covers the whole crawled file list. The answer is a JSON
//! array of `{name, description, file_indices}` items, validated against
//! the file list and capped at `max_abstractions`.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde_json::Value;
use tracing::{info, instrument, warn};

use repotutor_llm::Gateway;
use repotutor_shared::{Abstraction, FileEntry, RepoTutorError, Result, Stage};

use crate::context::{file_block, language_note};
use crate::parse::{ParseOutcome, extract_json, generate_parsed, parse_index, string_field};

/// Per-file character budget in the extraction prompt.
pub const DEFAULT_FILE_CHARS: usize = 2_000;

/// Options for [`extract_abstractions`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub project_name: String,
    pub language: String,
    /// Upper bound `K` on the number of abstractions.
    pub max_abstractions: usize,
    pub max_file_chars: usize,
}

impl ExtractOptions {
    pub fn new(project_name: impl Into<String>, language: impl Into<String>, max_abstractions: usize) -> Self {
        Self {
            project_name: project_name.into(),
            language: language.into(),
            max_abstractions,
            max_file_chars: DEFAULT_FILE_CHARS,
        }
    }
}

/// Propose at most `K` abstractions for `files`.
#[instrument(skip_all, fields(project = %opts.project_name, files = files.len(), k = opts.max_abstractions))]
pub async fn extract_abstractions(
    files: &[FileEntry],
    opts: &ExtractOptions,
    gateway: &Gateway,
) -> Result<Vec<Abstraction>> {
    if files.is_empty() {
        return Err(RepoTutorError::validation(
            "no files to analyze; check the include/exclude patterns",
        ));
    }
    if opts.max_abstractions == 0 {
        return Err(RepoTutorError::validation("max_abstractions must be at least 1"));
    }

    let prompt = build_prompt(files, opts);
    let abstractions = generate_parsed(gateway, Stage::Abstractions, &prompt, |raw| {
        parse_abstractions(raw, files.len(), opts.max_abstractions)
    })
    .await?;

    info!(count = abstractions.len(), "abstractions extracted");
    Ok(abstractions)
}

/// Validate an extraction answer against `file_count` files and the `max` cap.
pub fn parse_abstractions(raw: &str, file_count: usize, max: usize) -> ParseOutcome<Vec<Abstraction>> {
    let Some(value) = extract_json(raw) else {
        return ParseOutcome::malformed(raw, "no JSON value found");
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("abstractions") {
            Some(Value::Array(items)) => items,
            _ => return ParseOutcome::malformed(raw, "expected a JSON array of abstractions"),
        },
        _ => return ParseOutcome::malformed(raw, "expected a JSON array of abstractions"),
    };

    let mut abstractions: Vec<Abstraction> = Vec::new();
    let mut considered = 0;

    for item in &items {
        if abstractions.len() == max {
            break;
        }
        considered += 1;

        let Some(name) = string_field(item, "name") else {
            warn!(position = considered - 1, "abstraction without a name, dropping");
            continue;
        };
        let description = string_field(item, "description").unwrap_or_default();

        let mut file_indices = BTreeSet::new();
        match item.get("file_indices") {
            Some(Value::Array(entries)) => {
                for entry in entries {
                    match parse_index(entry) {
                        Some(i) if i < file_count => {
                            file_indices.insert(i);
                        }
                        _ => warn!(abstraction = name, value = %entry, "dropping invalid file index"),
                    }
                }
            }
            _ => warn!(abstraction = name, "abstraction lists no file indices"),
        }

        abstractions.push(Abstraction {
            index: abstractions.len(),
            name: name.to_string(),
            description: description.to_string(),
            file_indices,
        });
    }

    if items.len() > considered {
        warn!(
            dropped = items.len() - considered,
            max, "more abstractions than requested, dropping extras"
        );
    }

    if abstractions.is_empty() {
        return ParseOutcome::malformed(raw, "no valid abstractions in the answer");
    }
    ParseOutcome::Parsed(abstractions)
}

fn build_prompt(files: &[FileEntry], opts: &ExtractOptions) -> String {
    let mut context = String::new();
    let mut listing = String::new();
    for (i, file) in files.iter().enumerate() {
        context.push_str(&file_block(i, file, opts.max_file_chars));
        let _ = writeln!(listing, "- {i} # {}", file.path);
    }

    let language = language_note(&opts.language, "the `name` and `description` of each abstraction");

    format!(
        r##"For the project `{project}`:

Codebase Context:
{context}
{language}Analyze the codebase context.
Identify the top {max} (or fewer) most important core abstractions to help those new to the codebase.

For each abstraction, provide:
1. A concise `name`.
2. A beginner-friendly `description` explaining what it is with a simple analogy, in around 100 words.
3. A list of relevant `file_indices` (integers or "index # path" strings from the list below).

List of file indices and paths present in the context:
{listing}
Format the output as a JSON array inside a ```json block:

```json
[
  {{
    "name": "Query Processing",
    "description": "Explains what the abstraction does. It's like a central dispatcher routing requests.",
    "file_indices": ["0 # path/to/file1.py", "3 # path/to/related.py"]
  }}
]
```"##,
        project = opts.project_name,
        max = opts.max_abstractions,
    )
}

//! Relationship mapping between extracted abstractions.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use repotutor_llm::Gateway;
use repotutor_shared::{Abstraction, FileEntry, Relationship, RelationshipGraph, Result, Stage};

use crate::context::language_note;
use crate::parse::{ParseOutcome, extract_json, generate_parsed, parse_index, string_field};

/// Options for [`map_relationships`].
#[derive(Debug, Clone)]
pub struct RelationshipOptions {
    pub project_name: String,
    pub language: String,
}

/// Ask for a project summary and the directed edges between `abstractions`.
#[instrument(skip_all, fields(project = %opts.project_name, abstractions = abstractions.len()))]
pub async fn map_relationships(
    abstractions: &[Abstraction],
    files: &[FileEntry],
    opts: &RelationshipOptions,
    gateway: &Gateway,
) -> Result<RelationshipGraph> {
    let prompt = build_prompt(abstractions, files, opts);
    let graph = generate_parsed(gateway, Stage::Relationships, &prompt, |raw| {
        parse_relationships(raw, abstractions.len())
    })
    .await?;

    let mut touched = BTreeSet::new();
    for rel in &graph.relationships {
        touched.insert(rel.source_index);
        touched.insert(rel.target_index);
    }
    for abstraction in abstractions.iter().filter(|a| !touched.contains(&a.index)) {
        debug!(abstraction = %abstraction.name, "abstraction takes part in no relationship");
    }

    info!(
        relationships = graph.relationships.len(),
        self_edges = graph.relationships.iter().filter(|r| r.is_self_edge()).count(),
        "relationships mapped"
    );
    Ok(graph)
}

/// Validate a mapping answer against `abstraction_count` abstractions.
pub fn parse_relationships(raw: &str, abstraction_count: usize) -> ParseOutcome<RelationshipGraph> {
    let Some(value) = extract_json(raw) else {
        return ParseOutcome::malformed(raw, "no JSON value found");
    };
    if !value.is_object() {
        return ParseOutcome::malformed(raw, "expected a JSON object with `summary` and `relationships`");
    }

    let Some(summary) = string_field(&value, "summary") else {
        return ParseOutcome::malformed(raw, "missing or empty `summary`");
    };
    let Some(Value::Array(items)) = value.get("relationships") else {
        return ParseOutcome::malformed(raw, "missing `relationships` array");
    };

    let mut relationships = Vec::with_capacity(items.len());
    for item in items {
        let source = item.get("from").and_then(parse_index);
        let target = item.get("to").and_then(parse_index);
        let (Some(source_index), Some(target_index)) = (source, target) else {
            warn!(relationship = %item, "dropping relationship with unparsable endpoints");
            continue;
        };
        if source_index >= abstraction_count || target_index >= abstraction_count {
            warn!(
                from = source_index,
                to = target_index,
                abstraction_count,
                "dropping relationship with out-of-range index"
            );
            continue;
        }

        let label = string_field(item, "label").unwrap_or("relates to").to_string();
        let relationship = Relationship {
            source_index,
            target_index,
            label,
        };
        if relationship.is_self_edge() {
            warn!(index = source_index, label = %relationship.label, "self-referencing relationship");
        }
        relationships.push(relationship);
    }

    ParseOutcome::Parsed(RelationshipGraph {
        project_summary: summary.to_string(),
        relationships,
    })
}

fn build_prompt(abstractions: &[Abstraction], files: &[FileEntry], opts: &RelationshipOptions) -> String {
    let mut listing = String::new();
    for a in abstractions {
        let paths: Vec<&str> = a
            .file_indices
            .iter()
            .filter_map(|&i| files.get(i).map(|f| f.path.as_str()))
            .collect();
        let _ = writeln!(listing, "- Index {} # {}", a.index, a.name);
        let _ = writeln!(listing, "  Description: {}", a.description);
        if !paths.is_empty() {
            let _ = writeln!(listing, "  Relevant files: {}", paths.join(", "));
        }
    }

    let language = language_note(&opts.language, "the `summary` and every relationship `label`");

    format!(
        r##"Based on the following abstractions of the project `{project}`:

{listing}
{language}Please provide:
1. A high-level `summary` of the project's main purpose and functionality in a few beginner-friendly sentences.
2. A list (`relationships`) describing the key interactions between these abstractions. For each relationship:
   - `from`: index of the source abstraction (e.g. `"0 # AbstractionName1"`)
   - `to`: index of the target abstraction (e.g. `"1 # AbstractionName2"`)
   - `label`: a brief label for the interaction **in just a few words** (e.g. "Manages", "Uses", "Configures")

Every abstraction should take part in at least one relationship.
Use only the indices listed above.

Format the output as JSON inside a ```json block:

```json
{{
  "summary": "A brief, simple explanation of the project.",
  "relationships": [
    {{"from": "0 # AbstractionName1", "to": "1 # AbstractionName2", "label": "Manages"}}
  ]
}}
```"##,
        project = opts.project_name,
    )
}

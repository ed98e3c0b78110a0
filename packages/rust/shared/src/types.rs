//! Core domain types for RepoTutor tutorial generation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RepoTutorError, Result};

/// Current schema version for the tutorial manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// FileEntry
// ---------------------------------------------------------------------------

/// A crawled source file. Immutable once produced by the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// UTF-8 file content.
    pub content: String,
    /// Size in bytes.
    pub size: u64,
}

impl FileEntry {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            size: content.len() as u64,
            content,
        }
    }
}

// ---------------------------------------------------------------------------
// Abstractions & relationships
// ---------------------------------------------------------------------------

/// A named conceptual unit of the repository, proposed by the extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abstraction {
    /// Stable 0-based position in extraction order.
    pub index: usize,
    pub name: String,
    pub description: String,
    /// Offsets into the crawled file list. Always in range after validation.
    pub file_indices: BTreeSet<usize>,
}

/// A directed, labelled edge between two abstractions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_index: usize,
    pub target_index: usize,
    pub label: String,
}

impl Relationship {
    /// Self-edges are kept but usually indicate a modelling artifact.
    pub fn is_self_edge(&self) -> bool {
        self.source_index == self.target_index
    }
}

/// Relationships plus the one-line project summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipGraph {
    pub project_summary: String,
    pub relationships: Vec<Relationship>,
}

// ---------------------------------------------------------------------------
// ChapterPlan
// ---------------------------------------------------------------------------

/// Reading order over abstractions. Always a permutation of `0..N`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChapterPlan(Vec<usize>);

impl ChapterPlan {
    /// Build a plan from an explicit order, rejecting anything that is not
    /// a permutation of `0..abstraction_count`.
    pub fn from_order(order: Vec<usize>, abstraction_count: usize) -> Result<Self> {
        if order.len() != abstraction_count {
            return Err(RepoTutorError::validation(format!(
                "chapter plan has {} entries, expected {abstraction_count}",
                order.len()
            )));
        }
        let mut seen = vec![false; abstraction_count];
        for &index in &order {
            match seen.get_mut(index) {
                None => {
                    return Err(RepoTutorError::validation(format!(
                        "chapter plan references unknown abstraction {index}"
                    )));
                }
                Some(true) => {
                    return Err(RepoTutorError::validation(format!(
                        "chapter plan repeats index {index}"
                    )));
                }
                Some(slot) => *slot = true,
            }
        }
        Ok(Self(order))
    }

    /// Order `0..abstraction_count` ascending by `key`. Always a permutation.
    pub fn ranked_by<K, F>(abstraction_count: usize, key: F) -> Self
    where
        K: Ord,
        F: FnMut(&usize) -> K,
    {
        let mut order: Vec<usize> = (0..abstraction_count).collect();
        order.sort_by_key(key);
        Self(order)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Chapter
// ---------------------------------------------------------------------------

/// A fenced diagram found in a chapter body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramBlock {
    /// Raw diagram source between the fences.
    pub source: String,
    /// Relative path of the rendered image once the block has been replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

/// One generated tutorial chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// 1-based chapter number, fixed by the plan.
    pub order: usize,
    pub abstraction_index: usize,
    pub title: String,
    /// Output filename, e.g. `03_response_cache.md`.
    pub filename: String,
    pub body: String,
    #[serde(default)]
    pub diagram_blocks: Vec<DiagramBlock>,
    /// Set when generation exhausted its retries and `body` is a placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Chapter {
    pub fn is_placeholder(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Degraded units
// ---------------------------------------------------------------------------

/// Pipeline stage a degraded unit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Crawl,
    Abstractions,
    Relationships,
    Chapter,
    Diagram,
    Export,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Crawl => "crawl",
            Self::Abstractions => "abstractions",
            Self::Relationships => "relationships",
            Self::Chapter => "chapter",
            Self::Diagram => "diagram",
            Self::Export => "export",
        };
        f.write_str(s)
    }
}

/// A unit of work that failed without aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedUnit {
    pub stage: Stage,
    /// What failed (file path, chapter filename, diagram artifact, ...).
    pub unit: String,
    pub reason: String,
}

impl DegradedUnit {
    pub fn new(stage: Stage, unit: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage,
            unit: unit.into(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

/// Response cache counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests that reached the text generation service (including retries).
    pub calls: u64,
}

/// Chapter listing inside `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestChapter {
    pub order: usize,
    pub title: String,
    pub filename: String,
    pub abstraction_index: usize,
    #[serde(default)]
    pub placeholder: bool,
}

/// The `manifest.json` written at the root of each tutorial directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorialManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    pub id: RunId,
    pub name: String,
    /// Repository URL or local directory the tutorial was built from.
    pub source: String,
    /// Tool version that produced this tutorial.
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub language: String,
    pub file_count: usize,
    pub chapters: Vec<ManifestChapter>,
    #[serde(default)]
    pub cache: CacheStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DegradedUnit>,
    /// Exported document filename, when export succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

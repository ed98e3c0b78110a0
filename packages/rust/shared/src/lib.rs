//! Shared types, error model, and configuration for RepoTutor.
//!
//! This crate is the foundation depended on by all other RepoTutor crates.
//! It provides:
//! - [`RepoTutorError`], the unified error type
//! - Domain types ([`FileEntry`], [`Abstraction`], [`ChapterPlan`], [`Chapter`], ...)
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlPoliciesConfig, DEFAULT_MAX_FILE_SIZE, DefaultsConfig,
    OpenRouterConfig, RenderConfig, api_key, config_dir, config_file_path, expand_home,
    github_token, init_config, load_config, load_config_from,
};
pub use error::{RepoTutorError, Result};
pub use types::{
    Abstraction, CURRENT_SCHEMA_VERSION, CacheStats, Chapter, ChapterPlan, DegradedUnit,
    DiagramBlock, FileEntry, ManifestChapter, Relationship, RelationshipGraph, RunId, Stage,
    TutorialManifest,
};

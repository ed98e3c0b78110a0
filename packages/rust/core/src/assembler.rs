//! Tutorial directory assembler.
//!
//! Clears what an earlier run left behind, writes the chapter files, the
//! index and the manifest, then concatenates everything into one document
//! and hands it to a [`DocumentExporter`].

use std::ffi::OsStr;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use repotutor_markdown::{link_text, slugify};
use repotutor_shared::{
    Abstraction, CURRENT_SCHEMA_VERSION, CacheStats, Chapter, DegradedUnit, ManifestChapter,
    RelationshipGraph, RenderConfig, RepoTutorError, Result, RunId, Stage, TutorialManifest,
};

use crate::diagrams::DIAGRAMS_DIR;
use crate::tools::run_tool;

pub const INDEX_FILE: &str = "index.md";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const COMBINED_FILE: &str = "combined.md";

static CHAPTER_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2,}_.+\.md$").expect("valid regex"));

// ---------------------------------------------------------------------------
// Exporter
// ---------------------------------------------------------------------------

/// Converts the concatenated Markdown document into its final format.
#[async_trait]
pub trait DocumentExporter: Send + Sync {
    fn name(&self) -> &str;

    async fn export(&self, markdown: &Path, target: &Path) -> Result<()>;
}

/// `md-to-pdf <file.md>`, which writes `<file>.pdf` next to its input.
#[derive(Debug, Clone)]
pub struct MdToPdf {
    command: String,
    timeout: Duration,
}

impl MdToPdf {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(&config.pdf_cmd, Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl DocumentExporter for MdToPdf {
    fn name(&self) -> &str {
        &self.command
    }

    async fn export(&self, markdown: &Path, target: &Path) -> Result<()> {
        // Image links in the document are relative to the tutorial directory.
        let file = markdown.file_name().unwrap_or(markdown.as_os_str());
        run_tool(&self.command, [file], markdown.parent(), self.timeout).await?;

        let produced = markdown.with_extension("pdf");
        if !produced.exists() {
            return Err(RepoTutorError::Render(format!(
                "{} did not produce {}",
                self.command,
                produced.display()
            )));
        }
        if produced != target {
            std::fs::rename(&produced, target).map_err(|e| RepoTutorError::io(target, e))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Configuration for tutorial assembly.
#[derive(Debug, Clone)]
pub struct AssembleConfig {
    pub run_id: RunId,
    /// Project name shown in the index title.
    pub name: String,
    /// Repository URL or local path.
    pub source: String,
    /// Directory receiving every output file.
    pub tutorial_dir: PathBuf,
    pub tool_version: String,
    pub model: String,
    pub language: String,
    pub file_count: usize,
    /// Cache counters recorded in the manifest.
    pub cache: CacheStats,
}

/// Output from a successful assembly.
#[derive(Debug, Clone)]
pub struct AssembleResult {
    pub tutorial_dir: PathBuf,
    pub manifest: TutorialManifest,
    /// Exported document, or the concatenated Markdown when export is off or failed.
    pub document: Option<PathBuf>,
    /// Every degraded unit of the run, including those passed in.
    pub degraded: Vec<DegradedUnit>,
}

/// Remove the artifacts of an earlier run from `dir`, creating it if needed.
///
/// Only generated files are touched: the index, manifest and combined
/// document, numbered chapter files, exported PDFs and `diagrams/`.
pub fn prepare_tutorial_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| RepoTutorError::io(dir, e))?;

    let entries = std::fs::read_dir(dir).map_err(|e| RepoTutorError::io(dir, e))?;
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());

        let outcome = if is_dir && name == DIAGRAMS_DIR {
            std::fs::remove_dir_all(&path)
        } else if !is_dir && is_generated_file(&name) {
            std::fs::remove_file(&path)
        } else {
            continue;
        };
        outcome.map_err(|e| RepoTutorError::io(&path, e))?;
        debug!(path = %path.display(), "removed previous output");
        removed += 1;
    }

    if removed > 0 {
        info!(removed, path = %dir.display(), "cleared previous tutorial output");
    }
    Ok(())
}

fn is_generated_file(name: &str) -> bool {
    matches!(name, INDEX_FILE | MANIFEST_FILE | COMBINED_FILE)
        || CHAPTER_FILE.is_match(name)
        || name.ends_with(".pdf")
}

/// Write the tutorial directory.
///
/// ```text
/// <tutorial_dir>/
/// ├── index.md
/// ├── 01_<slug>.md ...
/// ├── diagrams/*.svg
/// ├── manifest.json
/// └── <slug>.pdf       (combined.md when not exported)
/// ```
///
/// `index` is the rendered index page, diagrams already materialized.
/// An export failure is recorded as degraded; the run still succeeds.
#[instrument(skip_all, fields(name = %config.name, chapters = chapters.len()))]
pub async fn assemble(
    config: &AssembleConfig,
    index: &str,
    chapters: &[Chapter],
    mut degraded: Vec<DegradedUnit>,
    exporter: Option<&dyn DocumentExporter>,
) -> Result<AssembleResult> {
    let dir = &config.tutorial_dir;
    info!(path = %dir.display(), "assembling tutorial directory");

    std::fs::create_dir_all(dir).map_err(|e| RepoTutorError::io(dir, e))?;

    write_atomic(&dir.join(INDEX_FILE), index)?;

    for chapter in chapters {
        write_atomic(&dir.join(&chapter.filename), &chapter.body)?;
        debug!(file = %chapter.filename, placeholder = chapter.is_placeholder(), "wrote chapter");
    }

    let combined_path = dir.join(COMBINED_FILE);
    write_atomic(&combined_path, &combine(index, chapters))?;

    let document = match exporter {
        Some(exporter) => {
            let filename = format!("{}.pdf", slugify(&config.name));
            let target = dir.join(&filename);
            match exporter.export(&combined_path, &target).await {
                Ok(()) => {
                    info!(document = %filename, "document exported");
                    remove_intermediates(dir);
                    Some(target)
                }
                Err(e) => {
                    warn!(exporter = exporter.name(), error = %e, "export failed, keeping intermediates");
                    degraded.push(DegradedUnit::new(Stage::Export, filename, e.to_string()));
                    Some(combined_path)
                }
            }
        }
        None => Some(combined_path),
    };

    let manifest = build_manifest(config, chapters, &degraded, document.as_deref());
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;

    info!(
        chapters = chapters.len(),
        degraded = degraded.len(),
        path = %dir.display(),
        "tutorial assembly complete"
    );

    Ok(AssembleResult {
        tutorial_dir: dir.clone(),
        manifest,
        document,
        degraded,
    })
}

/// Render `index.md`: title, summary, relationship flowchart and chapter links.
pub fn render_index(
    config: &AssembleConfig,
    abstractions: &[Abstraction],
    graph: &RelationshipGraph,
    chapters: &[Chapter],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Tutorial: {}\n", config.name);
    let _ = writeln!(out, "{}\n", graph.project_summary.trim());
    let _ = writeln!(out, "**Source:** `{}`\n", config.source);

    out.push_str("```mermaid\nflowchart TD\n");
    for a in abstractions {
        let _ = writeln!(out, "    A{}[\"{}\"]", a.index, mermaid_label(&a.name));
    }
    for rel in &graph.relationships {
        let _ = writeln!(
            out,
            "    A{} -- \"{}\" --> A{}",
            rel.source_index,
            mermaid_label(&rel.label),
            rel.target_index
        );
    }
    out.push_str("```\n\n## Chapters\n\n");

    for chapter in chapters {
        let _ = write!(
            out,
            "{}. [{}]({})",
            chapter.order,
            link_text(&chapter.title),
            chapter.filename
        );
        if chapter.is_placeholder() {
            out.push_str(" _(not generated)_");
        }
        out.push('\n');
    }

    let _ = write!(out, "\n---\n\nGenerated by RepoTutor {}.\n", config.tool_version);
    out
}

fn mermaid_label(text: &str) -> String {
    text.replace('"', "'").replace(['\n', '\r'], " ")
}

/// Index and chapters joined by horizontal rules.
fn combine(index: &str, chapters: &[Chapter]) -> String {
    let mut out = index.trim_end().to_string();
    for chapter in chapters {
        out.push_str("\n\n---\n\n");
        out.push_str(chapter.body.trim_end());
    }
    out.push('\n');
    out
}

/// Drop `combined.md` and leftover diagram sources once the document exists.
fn remove_intermediates(dir: &Path) {
    let combined = dir.join(COMBINED_FILE);
    if let Err(e) = std::fs::remove_file(&combined) {
        warn!(path = %combined.display(), error = %e, "failed to remove combined document");
    }

    let diagrams = dir.join(DIAGRAMS_DIR);
    let Ok(entries) = std::fs::read_dir(&diagrams) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension() == Some(OsStr::new("mmd")) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove diagram source");
            } else {
                debug!(path = %path.display(), "removed diagram source");
            }
        }
    }
}

fn build_manifest(
    config: &AssembleConfig,
    chapters: &[Chapter],
    degraded: &[DegradedUnit],
    document: Option<&Path>,
) -> TutorialManifest {
    TutorialManifest {
        schema_version: CURRENT_SCHEMA_VERSION,
        id: config.run_id.clone(),
        name: config.name.clone(),
        source: config.source.clone(),
        tool_version: config.tool_version.clone(),
        created_at: Utc::now(),
        model: config.model.clone(),
        language: config.language.clone(),
        file_count: config.file_count,
        chapters: chapters
            .iter()
            .map(|c| ManifestChapter {
                order: c.order,
                title: c.title.clone(),
                filename: c.filename.clone(),
                abstraction_index: c.abstraction_index,
                placeholder: c.is_placeholder(),
            })
            .collect(),
        cache: config.cache,
        degraded: degraded.to_vec(),
        document: document
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned()),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Write to a temp file next to `path`, then rename over it.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| RepoTutorError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| RepoTutorError::io(path, e))?;
    Ok(())
}

/// Write a JSON file (pretty-printed).
fn write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| RepoTutorError::validation(format!("JSON serialization failed: {e}")))?;
    write_atomic(path, &json)?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use repotutor_shared::Relationship;

    use crate::testutil::temp_dir;

    /// Writes a stub PDF to the target.
    pub(crate) struct FakeExporter;

    #[async_trait]
    impl DocumentExporter for FakeExporter {
        fn name(&self) -> &str {
            "fake-pdf"
        }

        async fn export(&self, markdown: &Path, target: &Path) -> Result<()> {
            let text = std::fs::read_to_string(markdown).map_err(|e| RepoTutorError::io(markdown, e))?;
            std::fs::write(target, format!("%PDF-1.7\n{}", text.len()))
                .map_err(|e| RepoTutorError::io(target, e))
        }
    }

    pub(crate) struct FailingExporter;

    #[async_trait]
    impl DocumentExporter for FailingExporter {
        fn name(&self) -> &str {
            "broken-pdf"
        }

        async fn export(&self, _markdown: &Path, _target: &Path) -> Result<()> {
            Err(RepoTutorError::Render("chromium crashed".into()))
        }
    }

    fn config(dir: &Path) -> AssembleConfig {
        AssembleConfig {
            run_id: RunId::new(),
            name: "Demo Project".into(),
            source: "/tmp/demo".into(),
            tutorial_dir: dir.to_path_buf(),
            tool_version: "0.1.0-test".into(),
            model: "test/model".into(),
            language: "english".into(),
            file_count: 2,
            cache: CacheStats {
                hits: 1,
                misses: 2,
                calls: 2,
            },
        }
    }

    fn abstractions() -> Vec<Abstraction> {
        vec![
            Abstraction {
                index: 0,
                name: "Crawler".into(),
                description: "Reads files".into(),
                file_indices: BTreeSet::from([0]),
            },
            Abstraction {
                index: 1,
                name: "The \"Cache\"".into(),
                description: "Stores answers".into(),
                file_indices: BTreeSet::from([1]),
            },
        ]
    }

    fn graph() -> RelationshipGraph {
        RelationshipGraph {
            project_summary: "A demo project.".into(),
            relationships: vec![Relationship {
                source_index: 0,
                target_index: 1,
                label: "fills".into(),
            }],
        }
    }

    fn chapters() -> Vec<Chapter> {
        vec![
            Chapter {
                order: 1,
                abstraction_index: 0,
                title: "Crawler".into(),
                filename: "01_crawler.md".into(),
                body: "# Chapter 1: Crawler\n\nText.\n".into(),
                diagram_blocks: Vec::new(),
                error: None,
            },
            Chapter {
                order: 2,
                abstraction_index: 1,
                title: "The \"Cache\"".into(),
                filename: "02_the_cache.md".into(),
                body: "# Chapter 2: The \"Cache\"\n\n> This chapter could not be generated: boom\n".into(),
                diagram_blocks: Vec::new(),
                error: Some("boom".into()),
            },
        ]
    }

    fn index(dir: &Path) -> String {
        render_index(&config(dir), &abstractions(), &graph(), &chapters())
    }

    #[test]
    fn index_contains_flowchart_and_links() {
        let dir = PathBuf::from("/unused");
        let index = render_index(&config(&dir), &abstractions(), &graph(), &chapters());
        assert!(index.starts_with("# Tutorial: Demo Project\n\nA demo project.\n"));
        assert!(index.contains("    A1[\"The 'Cache'\"]"));
        assert!(index.contains("    A0 -- \"fills\" --> A1"));
        assert!(index.contains("1. [Crawler](01_crawler.md)\n"));
        assert!(index.contains("2. [The \"Cache\"](02_the_cache.md) _(not generated)_"));
    }

    #[tokio::test]
    async fn successful_export_cleans_intermediates() {
        let dir = temp_dir("assemble-ok");
        std::fs::create_dir_all(dir.join(DIAGRAMS_DIR)).unwrap();
        std::fs::write(dir.join("diagrams/chapter_01_diagram_1.mmd"), "graph TD").unwrap();
        std::fs::write(dir.join("diagrams/chapter_01_diagram_2.svg"), "<svg/>").unwrap();

        let result = assemble(
            &config(&dir),
            &index(&dir),
            &chapters(),
            vec![DegradedUnit::new(Stage::Chapter, "02_the_cache.md", "boom")],
            Some(&FakeExporter),
        )
        .await
        .unwrap();

        assert!(dir.join(INDEX_FILE).exists());
        assert!(dir.join("01_crawler.md").exists());
        assert!(dir.join("02_the_cache.md").exists());
        assert!(dir.join("demo_project.pdf").exists());
        assert!(!dir.join(COMBINED_FILE).exists());
        assert!(!dir.join("diagrams/chapter_01_diagram_1.mmd").exists());
        assert!(dir.join("diagrams/chapter_01_diagram_2.svg").exists());
        assert_eq!(result.document, Some(dir.join("demo_project.pdf")));
        assert_eq!(result.degraded.len(), 1);

        let manifest: TutorialManifest =
            serde_json::from_str(&std::fs::read_to_string(dir.join(MANIFEST_FILE)).unwrap())
                .unwrap();
        assert_eq!(manifest.chapters.len(), 2);
        assert!(manifest.chapters[1].placeholder);
        assert_eq!(manifest.document.as_deref(), Some("demo_project.pdf"));
        assert_eq!(manifest.cache.hits, 1);
        assert_eq!(manifest.degraded[0].stage, Stage::Chapter);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_export_is_degraded_and_keeps_intermediates() {
        let dir = temp_dir("assemble-fail");
        std::fs::create_dir_all(dir.join(DIAGRAMS_DIR)).unwrap();
        std::fs::write(dir.join("diagrams/chapter_02_diagram_1.mmd"), "INVALID").unwrap();

        let result = assemble(
            &config(&dir),
            &index(&dir),
            &chapters(),
            Vec::new(),
            Some(&FailingExporter),
        )
        .await
        .unwrap();

        assert!(dir.join(COMBINED_FILE).exists());
        assert!(dir.join("diagrams/chapter_02_diagram_1.mmd").exists());
        assert_eq!(result.degraded.len(), 1);
        assert_eq!(result.degraded[0].stage, Stage::Export);
        assert!(result.degraded[0].reason.contains("chromium crashed"));
        assert_eq!(result.manifest.document.as_deref(), Some(COMBINED_FILE));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn no_exporter_keeps_combined_document() {
        let dir = temp_dir("assemble-noexport");
        let result = assemble(&config(&dir), &index(&dir), &chapters(), Vec::new(), None)
            .await
            .unwrap();

        let combined = std::fs::read_to_string(dir.join(COMBINED_FILE)).unwrap();
        assert!(combined.starts_with("# Tutorial: Demo Project"));
        assert!(combined.contains("\n\n---\n\n# Chapter 1: Crawler"));
        assert!(combined.ends_with("could not be generated: boom\n"));
        assert!(result.degraded.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn index_link_text_escapes_brackets() {
        let dir = PathBuf::from("/unused");
        let mut chapters = chapters();
        chapters[0].title = "Option[T] Handling".into();
        let index = render_index(&config(&dir), &abstractions(), &graph(), &chapters);
        assert!(index.contains("1. [Option\\[T\\] Handling](01_crawler.md)\n"));
    }

    #[test]
    fn prepare_removes_previous_output_only() {
        let dir = temp_dir("assemble-prepare");
        std::fs::create_dir_all(dir.join(DIAGRAMS_DIR)).unwrap();
        for stale in [
            INDEX_FILE,
            MANIFEST_FILE,
            COMBINED_FILE,
            "01_crawler.md",
            "12_old_chapter.md",
            "demo_project.pdf",
            "diagrams/chapter_03_diagram_1.svg",
            "diagrams/index_diagram_1.mmd",
        ] {
            std::fs::write(dir.join(stale), "old").unwrap();
        }
        std::fs::write(dir.join("notes.md"), "mine").unwrap();
        std::fs::write(dir.join("1_short.md"), "mine").unwrap();

        prepare_tutorial_dir(&dir).unwrap();

        let mut left: Vec<String> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["1_short.md", "notes.md"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn prepare_creates_missing_dir() {
        let dir = temp_dir("assemble-fresh").join("nested");
        prepare_tutorial_dir(&dir).unwrap();
        assert!(dir.is_dir());
        let _ = std::fs::remove_dir_all(dir.parent().unwrap());
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = temp_dir("assemble-atomic");
        let path = dir.join("01_x.md");
        write_atomic(&path, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(!dir.join(".01_x.md.tmp").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}

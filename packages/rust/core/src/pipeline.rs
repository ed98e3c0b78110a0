//! End-to-end `generate` pipeline: repository → crawl → abstractions →
//! relationships → chapter order → chapters → diagrams → tutorial directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use repotutor_crawler::{Crawler, RepoSource};
use repotutor_llm::Gateway;
use repotutor_markdown::slugify;
use repotutor_shared::{
    CacheStats, CrawlConfig, DegradedUnit, RepoTutorError, Result, RunId, Stage,
};
use repotutor_storage::ResponseCache;

use crate::abstractions::{DEFAULT_FILE_CHARS, ExtractOptions, extract_abstractions};
use crate::assembler::{
    AssembleConfig, DocumentExporter, assemble, prepare_tutorial_dir, render_index,
};
use crate::chapters::{ChapterOptions, DEFAULT_CHAPTER_FILE_CHARS, write_chapters};
use crate::diagrams::{DiagramRenderer, materialize_diagrams, materialize_index};
use crate::relationships::{RelationshipOptions, map_relationships};
use crate::sequencer::order_chapters;

/// Configuration for the `generate` pipeline.
#[derive(Debug, Clone)]
pub struct TutorialConfig {
    /// Repository to explain.
    pub source: RepoSource,
    /// Project name (defaults to the repository or directory name).
    pub name: String,
    /// Output root; the tutorial lands in `<output_root>/<slug>`.
    pub output_root: PathBuf,
    /// Language the tutorial is written in.
    pub language: String,
    /// Upper bound on extracted abstractions.
    pub max_abstractions: usize,
    /// Worker pool size for chapters and diagrams.
    pub concurrency: usize,
    pub crawl: CrawlConfig,
    /// Tool version string.
    pub tool_version: String,
}

/// Collaborators injected into the pipeline.
pub struct Services {
    pub gateway: Arc<Gateway>,
    /// The cache inside `gateway`; also receives the run history.
    pub cache: Arc<ResponseCache>,
    pub renderer: Arc<dyn DiagramRenderer>,
    /// `None` keeps the concatenated Markdown as the final document.
    pub exporter: Option<Arc<dyn DocumentExporter>>,
}

/// Result of the `generate` pipeline.
#[derive(Debug)]
pub struct TutorialResult {
    pub run_id: RunId,
    /// Path to the tutorial directory.
    pub tutorial_dir: PathBuf,
    pub chapter_count: usize,
    pub file_count: usize,
    /// Exported document, or `combined.md` when export is off or failed.
    pub document: Option<PathBuf>,
    /// Everything that failed without aborting the run.
    pub degraded: Vec<DegradedUnit>,
    pub cache: CacheStats,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called as units of a parallel stage finish.
    fn stage_progress(&self, current: usize, total: usize, detail: &str);
    /// Called when the pipeline completes.
    fn done(&self, result: &TutorialResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn stage_progress(&self, _current: usize, _total: usize, _detail: &str) {}
    fn done(&self, _result: &TutorialResult) {}
}

/// Run the full `generate` pipeline.
///
/// 1. Crawl the repository
/// 2. Extract abstractions
/// 3. Map relationships
/// 4. Order chapters
/// 5. Write chapters (parallel)
/// 6. Clear the previous output and render diagrams (parallel)
/// 7. Render the index and assemble the tutorial directory
///
/// Stages 1-4 are fatal on failure. Later per-unit failures are collected
/// as degraded units.
#[instrument(skip_all, fields(source = %config.source, name = %config.name))]
pub async fn generate_tutorial(
    config: &TutorialConfig,
    services: &Services,
    progress: &dyn ProgressReporter,
) -> Result<TutorialResult> {
    let start = Instant::now();
    let run_id = RunId::new();
    let source = config.source.to_string();

    info!(%run_id, source = %source, model = services.gateway.model(), "starting generate pipeline");

    if let Some(storage) = services.cache.storage() {
        if let Err(e) = storage.insert_run(&run_id.to_string(), &config.name, &source).await {
            warn!(error = %e, "failed to record run start");
        }
    }

    let mut degraded = Vec::new();

    // --- Phase 1: Crawl ---
    progress.phase("Crawling repository");
    let crawler = Crawler::new(config.crawl.clone())?;
    let crawl = crawler.crawl(&config.source).await?;

    for skipped in crawl.warnings() {
        degraded.push(DegradedUnit::new(Stage::Crawl, &skipped.path, skipped.reason.to_string()));
    }
    if crawl.files.is_empty() {
        return Err(RepoTutorError::validation(format!(
            "no files matched the include/exclude patterns in {source}"
        )));
    }
    let files = crawl.files;

    // --- Phase 2: Abstractions ---
    progress.phase("Identifying abstractions");
    let mut extract_opts = ExtractOptions::new(&config.name, &config.language, config.max_abstractions);
    extract_opts.max_file_chars = DEFAULT_FILE_CHARS;
    let abstractions = extract_abstractions(&files, &extract_opts, &services.gateway).await?;

    // --- Phase 3: Relationships ---
    progress.phase("Mapping relationships");
    let relationship_opts = RelationshipOptions {
        project_name: config.name.clone(),
        language: config.language.clone(),
    };
    let graph = map_relationships(&abstractions, &files, &relationship_opts, &services.gateway).await?;

    // --- Phase 4: Order ---
    progress.phase("Ordering chapters");
    let plan = order_chapters(&abstractions, &graph);

    // --- Phase 5: Chapters ---
    progress.phase("Writing chapters");
    let chapter_opts = ChapterOptions {
        project_name: config.name.clone(),
        language: config.language.clone(),
        concurrency: config.concurrency,
        max_file_chars: DEFAULT_CHAPTER_FILE_CHARS,
    };
    let mut chapters = write_chapters(
        &plan,
        &abstractions,
        &graph,
        &files,
        &chapter_opts,
        Arc::clone(&services.gateway),
        progress,
    )
    .await;

    for chapter in &chapters {
        if let Some(reason) = &chapter.error {
            warn!(chapter = %chapter.filename, reason = %reason, "chapter replaced by placeholder");
            degraded.push(DegradedUnit::new(Stage::Chapter, &chapter.filename, reason));
        }
    }

    // --- Phase 6: Diagrams ---
    progress.phase("Rendering diagrams");
    let tutorial_dir = config.output_root.join(slugify(&config.name));
    prepare_tutorial_dir(&tutorial_dir)?;
    let report = materialize_diagrams(
        &mut chapters,
        Arc::clone(&services.renderer),
        &tutorial_dir,
        config.concurrency,
    )
    .await?;
    degraded.extend(report.degraded);

    // --- Phase 7: Assemble ---
    progress.phase(if services.exporter.is_some() {
        "Assembling and exporting tutorial"
    } else {
        "Assembling tutorial"
    });
    let assemble_config = AssembleConfig {
        run_id: run_id.clone(),
        name: config.name.clone(),
        source: source.clone(),
        tutorial_dir,
        tool_version: config.tool_version.clone(),
        model: services.gateway.model().to_string(),
        language: config.language.clone(),
        file_count: files.len(),
        cache: services.gateway.stats(),
    };
    let mut index = render_index(&assemble_config, &abstractions, &graph, &chapters);
    let index_report = materialize_index(
        &mut index,
        Arc::clone(&services.renderer),
        &assemble_config.tutorial_dir,
    )
    .await?;
    degraded.extend(index_report.degraded);

    let assembled = assemble(
        &assemble_config,
        &index,
        &chapters,
        degraded,
        services.exporter.as_deref(),
    )
    .await?;

    let result = TutorialResult {
        run_id,
        tutorial_dir: assembled.tutorial_dir,
        chapter_count: chapters.len(),
        file_count: files.len(),
        document: assembled.document,
        degraded: assembled.degraded,
        cache: assemble_config.cache,
        elapsed: start.elapsed(),
    };

    if let Some(storage) = services.cache.storage() {
        let stats = serde_json::json!({
            "chapters": result.chapter_count,
            "files": result.file_count,
            "degraded": result.degraded.len(),
            "cache": result.cache,
        });
        if let Err(e) = storage.finish_run(&result.run_id.to_string(), &stats.to_string()).await {
            warn!(error = %e, "failed to record run completion");
        }
    }

    progress.done(&result);

    info!(
        run_id = %result.run_id,
        chapters = result.chapter_count,
        files = result.file_count,
        degraded = result.degraded.len(),
        cache_hits = result.cache.hits,
        generator_calls = result.cache.calls,
        elapsed_ms = result.elapsed.as_millis(),
        "generate pipeline complete"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Diagram materialization: Mermaid fences to SVG files.
//!
//! Each fence is written to `diagrams/chapter_{nn}_diagram_{k}.mmd` (or
//! `index_diagram_{k}.mmd` for the index page) and handed to a
//! [`DiagramRenderer`]. A rendered block is replaced by an image
//! reference; a failed one stays verbatim and is reported as degraded.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use repotutor_markdown::{find_diagram_blocks, image_reference, rewrite_diagram_blocks};
use repotutor_shared::{
    Chapter, DegradedUnit, DiagramBlock, RenderConfig, RepoTutorError, Result, Stage,
};

use crate::tools::run_tool;

/// Directory, relative to the tutorial root, holding diagram sources and images.
pub const DIAGRAMS_DIR: &str = "diagrams";

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Converts one Mermaid source file into an image file.
#[async_trait]
pub trait DiagramRenderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, source: &Path, target: &Path) -> Result<()>;
}

/// The Mermaid CLI: `mmdc -i in.mmd -o out.svg`.
#[derive(Debug, Clone)]
pub struct MermaidCli {
    command: String,
    timeout: Duration,
}

impl MermaidCli {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    pub fn from_config(config: &RenderConfig) -> Self {
        Self::new(&config.mermaid_cmd, Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl DiagramRenderer for MermaidCli {
    fn name(&self) -> &str {
        &self.command
    }

    async fn render(&self, source: &Path, target: &Path) -> Result<()> {
        let args = [
            OsStr::new("-i"),
            source.as_os_str(),
            OsStr::new("-o"),
            target.as_os_str(),
        ];
        run_tool(&self.command, args, None, self.timeout).await
    }
}

// ---------------------------------------------------------------------------
// Materializer
// ---------------------------------------------------------------------------

/// Outcome of a materialization pass.
#[derive(Debug, Clone, Default)]
pub struct DiagramReport {
    pub rendered: usize,
    pub failed: usize,
    pub degraded: Vec<DegradedUnit>,
}

/// File-name prefix shared by the diagrams of the index page.
pub const INDEX_PREFIX: &str = "index";

/// File-name prefix for the diagrams of chapter `order`.
pub fn chapter_prefix(order: usize) -> String {
    format!("chapter_{order:02}")
}

/// File stem for block `number` under `prefix`.
pub fn diagram_stem(prefix: &str, number: usize) -> String {
    format!("{prefix}_diagram_{number}")
}

/// A Markdown body whose fences share one file-name prefix.
struct Target<'a> {
    prefix: String,
    body: &'a mut String,
}

/// Render every Mermaid fence in `chapters` and rewrite their bodies.
///
/// `tutorial_dir` is the tutorial root; sources and images go to its
/// `diagrams/` subdirectory.
#[instrument(skip_all, fields(chapters = chapters.len(), renderer = renderer.name()))]
pub async fn materialize_diagrams(
    chapters: &mut [Chapter],
    renderer: Arc<dyn DiagramRenderer>,
    tutorial_dir: &Path,
    concurrency: usize,
) -> Result<DiagramReport> {
    let (report, blocks) = {
        let mut targets: Vec<Target<'_>> = chapters
            .iter_mut()
            .map(|c| Target {
                prefix: chapter_prefix(c.order),
                body: &mut c.body,
            })
            .collect();
        materialize(&mut targets, renderer, tutorial_dir, concurrency).await?
    };

    for (chapter, blocks) in chapters.iter_mut().zip(blocks) {
        chapter.diagram_blocks = blocks;
    }

    info!(
        rendered = report.rendered,
        failed = report.failed,
        "diagrams materialized"
    );
    Ok(report)
}

/// Render the fences of the index page as `diagrams/index_diagram_{k}.svg`.
#[instrument(skip_all, fields(renderer = renderer.name()))]
pub async fn materialize_index(
    index: &mut String,
    renderer: Arc<dyn DiagramRenderer>,
    tutorial_dir: &Path,
) -> Result<DiagramReport> {
    let mut targets = vec![Target {
        prefix: INDEX_PREFIX.to_string(),
        body: index,
    }];
    let (report, _) = materialize(&mut targets, renderer, tutorial_dir, 1).await?;
    debug!(rendered = report.rendered, failed = report.failed, "index diagrams materialized");
    Ok(report)
}

/// Shared pass: write sources, render in parallel, rewrite each body.
///
/// Returns the report and, per target, the blocks found in it.
async fn materialize(
    targets: &mut [Target<'_>],
    renderer: Arc<dyn DiagramRenderer>,
    tutorial_dir: &Path,
    concurrency: usize,
) -> Result<(DiagramReport, Vec<Vec<DiagramBlock>>)> {
    let mut report = DiagramReport::default();
    let diagrams_dir = tutorial_dir.join(DIAGRAMS_DIR);

    let mut sources: Vec<(usize, usize, String)> = Vec::new();
    for (pos, target) in targets.iter().enumerate() {
        for (i, fence) in find_diagram_blocks(target.body.as_str()).into_iter().enumerate() {
            sources.push((pos, i + 1, fence.source));
        }
    }
    if sources.is_empty() {
        debug!("no diagrams to render");
        return Ok((report, vec![Vec::new(); targets.len()]));
    }

    std::fs::create_dir_all(&diagrams_dir)
        .map_err(|e| RepoTutorError::io(&diagrams_dir, e))?;

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();

    for (pos, number, source) in sources {
        let stem = diagram_stem(&targets[pos].prefix, number);
        let mmd = diagrams_dir.join(format!("{stem}.mmd"));
        let svg = diagrams_dir.join(format!("{stem}.svg"));

        if let Err(e) = std::fs::write(&mmd, format!("{source}\n")) {
            warn!(path = %mmd.display(), error = %e, "failed to write diagram source");
            report.failed += 1;
            report.degraded.push(DegradedUnit::new(
                Stage::Diagram,
                format!("{DIAGRAMS_DIR}/{stem}.mmd"),
                e.to_string(),
            ));
            continue;
        }

        let renderer = Arc::clone(&renderer);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = render_one(renderer.as_ref(), &mmd, &svg).await;
            (pos, number, stem, mmd, outcome)
        });
    }

    let mut rendered: BTreeSet<(usize, usize)> = BTreeSet::new();
    while let Some(joined) = set.join_next().await {
        let (pos, number, stem, mmd, outcome) = match joined {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "diagram task aborted");
                report.failed += 1;
                report
                    .degraded
                    .push(DegradedUnit::new(Stage::Diagram, "diagram task", e.to_string()));
                continue;
            }
        };

        match outcome {
            Ok(()) => {
                rendered.insert((pos, number));
                report.rendered += 1;
                if let Err(e) = std::fs::remove_file(&mmd) {
                    warn!(path = %mmd.display(), error = %e, "failed to remove diagram source");
                }
            }
            Err(e) => {
                warn!(diagram = %stem, error = %e, "diagram conversion failed, keeping fence");
                report.failed += 1;
                report.degraded.push(DegradedUnit::new(
                    Stage::Diagram,
                    format!("{DIAGRAMS_DIR}/{stem}.mmd"),
                    e.to_string(),
                ));
            }
        }
    }

    let mut all_blocks = Vec::with_capacity(targets.len());
    for (pos, target) in targets.iter_mut().enumerate() {
        let prefix = target.prefix.as_str();
        let mut blocks = Vec::new();
        let body = rewrite_diagram_blocks(target.body.as_str(), |number, fence| {
            let done = rendered.contains(&(pos, number));
            let artifact = done.then(|| format!("{DIAGRAMS_DIR}/{}.svg", diagram_stem(prefix, number)));
            blocks.push(DiagramBlock {
                source: fence.source.clone(),
                artifact: artifact.clone(),
            });
            artifact.map(|path| image_reference(number, &path))
        });
        *target.body = body;
        all_blocks.push(blocks);
    }

    Ok((report, all_blocks))
}

/// Render and check that a non-empty image came out.
async fn render_one(renderer: &dyn DiagramRenderer, mmd: &Path, svg: &Path) -> Result<()> {
    renderer.render(mmd, svg).await?;
    match std::fs::metadata(svg) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(RepoTutorError::Render(format!(
            "{} produced an empty image",
            renderer.name()
        ))),
        Err(_) => Err(RepoTutorError::Render(format!(
            "{} produced no image",
            renderer.name()
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use crate::testutil::temp_dir;

    /// Writes a tiny SVG unless the source contains `INVALID`.
    pub(crate) struct FakeRenderer;

    #[async_trait]
    impl DiagramRenderer for FakeRenderer {
        fn name(&self) -> &str {
            "fake-mmdc"
        }

        async fn render(&self, source: &Path, target: &Path) -> Result<()> {
            let text = std::fs::read_to_string(source).map_err(|e| RepoTutorError::io(source, e))?;
            if text.contains("INVALID") {
                return Err(RepoTutorError::Render("Parse error on line 1".into()));
            }
            std::fs::write(target, "<svg/>").map_err(|e| RepoTutorError::io(target, e))
        }
    }

    /// Exits successfully without writing anything.
    struct SilentRenderer;

    #[async_trait]
    impl DiagramRenderer for SilentRenderer {
        fn name(&self) -> &str {
            "silent"
        }

        async fn render(&self, _source: &Path, _target: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn chapter(order: usize, body: &str) -> Chapter {
        Chapter {
            order,
            abstraction_index: order - 1,
            title: format!("C{order}"),
            filename: format!("{order:02}_c{order}.md"),
            body: body.to_string(),
            diagram_blocks: Vec::new(),
            error: None,
        }
    }

    #[tokio::test]
    async fn valid_diagram_is_replaced_and_source_removed() {
        let dir = temp_dir("diagrams-ok");
        let mut chapters = vec![chapter(1, "# C1\n\n```mermaid\ngraph TD\n  A --> B\n```\n\nAfter.\n")];

        let report = materialize_diagrams(&mut chapters, Arc::new(FakeRenderer), &dir, 2)
            .await
            .unwrap();

        assert_eq!(report.rendered, 1);
        assert!(report.degraded.is_empty());
        assert_eq!(
            chapters[0].body,
            "# C1\n\n![Diagram 1](diagrams/chapter_01_diagram_1.svg)\n\nAfter.\n"
        );
        assert_eq!(
            chapters[0].diagram_blocks[0].artifact.as_deref(),
            Some("diagrams/chapter_01_diagram_1.svg")
        );
        assert!(dir.join("diagrams/chapter_01_diagram_1.svg").exists());
        assert!(!dir.join("diagrams/chapter_01_diagram_1.mmd").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn malformed_diagram_keeps_fence_and_is_degraded() {
        let dir = temp_dir("diagrams-bad");
        let body = "# C2\n\n```mermaid\nINVALID ->\n```\n\n```mermaid\ngraph LR\n  X --> Y\n```\n";
        let mut chapters = vec![chapter(1, "# C1\n\nNo diagrams.\n"), chapter(2, body)];

        let report = materialize_diagrams(&mut chapters, Arc::new(FakeRenderer), &dir, 4)
            .await
            .unwrap();

        assert_eq!(report.rendered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.degraded.len(), 1);
        assert_eq!(report.degraded[0].stage, Stage::Diagram);
        assert_eq!(report.degraded[0].unit, "diagrams/chapter_02_diagram_1.mmd");

        let body = &chapters[1].body;
        assert!(body.contains("```mermaid\nINVALID ->\n```"));
        assert!(body.contains("![Diagram 2](diagrams/chapter_02_diagram_2.svg)"));
        assert!(dir.join("diagrams/chapter_02_diagram_1.mmd").exists());
        assert!(chapters[1].diagram_blocks[0].artifact.is_none());
        assert_eq!(chapters[0].body, "# C1\n\nNo diagrams.\n");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn renderer_without_output_counts_as_failure() {
        let dir = temp_dir("diagrams-empty");
        let mut chapters = vec![chapter(1, "```mermaid\ngraph TD\n```\n")];

        let report = materialize_diagrams(&mut chapters, Arc::new(SilentRenderer), &dir, 1)
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert!(chapters[0].body.contains("```mermaid"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn no_fences_creates_nothing() {
        let dir = temp_dir("diagrams-none");
        let mut chapters = vec![chapter(1, "# C1\n")];
        let report = materialize_diagrams(&mut chapters, Arc::new(FakeRenderer), &dir, 1)
            .await
            .unwrap();
        assert_eq!(report.rendered + report.failed, 0);
        assert!(!dir.join(DIAGRAMS_DIR).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn index_flowchart_becomes_an_image() {
        let dir = temp_dir("diagrams-index");
        let mut index = "# Tutorial: Demo\n\n```mermaid\nflowchart TD\n    A0[\"App\"]\n```\n\n## Chapters\n".to_string();

        let report = materialize_index(&mut index, Arc::new(FakeRenderer), &dir).await.unwrap();

        assert_eq!(report.rendered, 1);
        assert!(report.degraded.is_empty());
        assert!(!index.contains("```mermaid"));
        assert!(index.contains("![Diagram 1](diagrams/index_diagram_1.svg)"));
        assert!(dir.join("diagrams/index_diagram_1.svg").exists());
        assert!(!dir.join("diagrams/index_diagram_1.mmd").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn failed_index_flowchart_is_degraded() {
        let dir = temp_dir("diagrams-index-bad");
        let mut index = "# Tutorial: Demo\n\n```mermaid\nINVALID\n```\n".to_string();

        let report = materialize_index(&mut index, Arc::new(FakeRenderer), &dir).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.degraded[0].stage, Stage::Diagram);
        assert_eq!(report.degraded[0].unit, "diagrams/index_diagram_1.mmd");
        assert!(index.contains("```mermaid\nINVALID\n```"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stem_is_zero_padded() {
        assert_eq!(diagram_stem(&chapter_prefix(3), 2), "chapter_03_diagram_2");
        assert_eq!(diagram_stem(INDEX_PREFIX, 1), "index_diagram_1");
    }
}

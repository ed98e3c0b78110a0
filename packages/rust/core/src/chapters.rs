//! Chapter generation on a bounded worker pool.
//!
//! Every plan position gets its own task. Results land in plan order no
//! matter when they finish, and a failed chapter becomes a placeholder
//! without touching its siblings.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use repotutor_llm::Gateway;
use repotutor_markdown::{chapter_filename, clean_chapter, find_diagram_blocks, link_text};
use repotutor_shared::{
    Abstraction, Chapter, ChapterPlan, DiagramBlock, FileEntry, RelationshipGraph,
};

use crate::context::{file_block, language_note};
use crate::pipeline::ProgressReporter;

/// Per-file character budget in chapter prompts.
pub const DEFAULT_CHAPTER_FILE_CHARS: usize = 4_000;

/// Options for [`write_chapters`].
#[derive(Debug, Clone)]
pub struct ChapterOptions {
    pub project_name: String,
    pub language: String,
    /// Worker pool size.
    pub concurrency: usize,
    pub max_file_chars: usize,
}

/// What one worker needs to produce one chapter.
struct ChapterJob {
    position: usize,
    order: usize,
    abstraction_index: usize,
    title: String,
    filename: String,
    prompt: String,
}

/// Generate one chapter per plan position, returned in plan order.
#[instrument(skip_all, fields(chapters = plan.len(), concurrency = opts.concurrency))]
pub async fn write_chapters(
    plan: &ChapterPlan,
    abstractions: &[Abstraction],
    graph: &RelationshipGraph,
    files: &[FileEntry],
    opts: &ChapterOptions,
    gateway: Arc<Gateway>,
    progress: &dyn ProgressReporter,
) -> Vec<Chapter> {
    let listing = chapter_listing(plan, abstractions);
    let jobs: Vec<ChapterJob> = plan
        .iter()
        .enumerate()
        .filter_map(|(position, &index)| {
            let abstraction = abstractions.get(index)?;
            Some(ChapterJob {
                position,
                order: position + 1,
                abstraction_index: index,
                title: abstraction.name.clone(),
                filename: listing[position].1.clone(),
                prompt: build_prompt(position, abstraction, abstractions, graph, files, &listing, opts),
            })
        })
        .collect();

    let total = plan.len();
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let mut set = JoinSet::new();

    for job in jobs {
        let gateway = Arc::clone(&gateway);
        let semaphore = Arc::clone(&semaphore);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let position = job.position;
            (position, generate_chapter(job, &gateway).await)
        });
    }

    let mut slots: Vec<Option<Chapter>> = vec![None; total];
    let mut completed = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((position, chapter)) => {
                completed += 1;
                progress.stage_progress(completed, total, &chapter.title);
                slots[position] = Some(chapter);
            }
            Err(e) => warn!(error = %e, "chapter task aborted"),
        }
    }

    let chapters: Vec<Chapter> = slots
        .into_iter()
        .enumerate()
        .map(|(position, slot)| {
            slot.unwrap_or_else(|| {
                let (title, filename) = listing[position].clone();
                placeholder(
                    position + 1,
                    plan.as_slice()[position],
                    title,
                    filename,
                    "chapter task aborted".into(),
                )
            })
        })
        .collect();

    info!(
        chapters = chapters.len(),
        placeholders = chapters.iter().filter(|c| c.is_placeholder()).count(),
        "chapters written"
    );
    chapters
}

/// Gateway call plus one chapter-level retry, falling back to a placeholder.
async fn generate_chapter(job: ChapterJob, gateway: &Gateway) -> Chapter {
    let mut outcome = gateway.generate(&job.prompt).await;
    if let Err(e) = &outcome {
        warn!(chapter = job.order, title = %job.title, error = %e, "chapter generation failed, retrying once");
        outcome = gateway.generate(&job.prompt).await;
    }

    match outcome {
        Ok(raw) => {
            let body = clean_chapter(&raw, job.order, &job.title);
            let diagram_blocks = find_diagram_blocks(&body)
                .into_iter()
                .map(|fence| DiagramBlock {
                    source: fence.source,
                    artifact: None,
                })
                .collect();
            Chapter {
                order: job.order,
                abstraction_index: job.abstraction_index,
                title: job.title,
                filename: job.filename,
                body,
                diagram_blocks,
                error: None,
            }
        }
        Err(e) => {
            warn!(chapter = job.order, title = %job.title, error = %e, "chapter replaced by placeholder");
            placeholder(job.order, job.abstraction_index, job.title, job.filename, e.to_string())
        }
    }
}

fn placeholder(
    order: usize,
    abstraction_index: usize,
    title: String,
    filename: String,
    reason: String,
) -> Chapter {
    let body = format!(
        "# Chapter {order}: {title}\n\n> This chapter could not be generated: {reason}\n"
    );
    Chapter {
        order,
        abstraction_index,
        title,
        filename,
        body,
        diagram_blocks: Vec::new(),
        error: Some(reason),
    }
}

/// `(title, filename)` for every plan position.
fn chapter_listing(plan: &ChapterPlan, abstractions: &[Abstraction]) -> Vec<(String, String)> {
    plan.iter()
        .enumerate()
        .map(|(position, &index)| {
            let title = abstractions
                .get(index)
                .map(|a| a.name.clone())
                .unwrap_or_else(|| format!("Chapter {}", position + 1));
            let filename = chapter_filename(position + 1, &title);
            (title, filename)
        })
        .collect()
}

fn build_prompt(
    position: usize,
    abstraction: &Abstraction,
    abstractions: &[Abstraction],
    graph: &RelationshipGraph,
    files: &[FileEntry],
    listing: &[(String, String)],
    opts: &ChapterOptions,
) -> String {
    let order = position + 1;

    let mut structure = String::new();
    for (i, (title, filename)) in listing.iter().enumerate() {
        let _ = writeln!(structure, "{}. [{}]({filename})", i + 1, link_text(title));
    }

    let mut related = String::new();
    for rel in &graph.relationships {
        let name_of = |i: usize| abstractions.get(i).map(|a| a.name.as_str()).unwrap_or("?");
        if rel.source_index == abstraction.index && !rel.is_self_edge() {
            let _ = writeln!(related, "- {} {} {}", abstraction.name, rel.label, name_of(rel.target_index));
        } else if rel.target_index == abstraction.index && !rel.is_self_edge() {
            let _ = writeln!(related, "- {} {} {}", name_of(rel.source_index), rel.label, abstraction.name);
        }
    }
    if related.is_empty() {
        related.push_str("- (none)\n");
    }

    let previous = match position.checked_sub(1).and_then(|p| listing.get(p)) {
        Some((title, filename)) => format!("[{}]({filename})", link_text(title)),
        None => "None (this is the first chapter)".to_string(),
    };
    let next = match listing.get(position + 1) {
        Some((title, filename)) => format!("[{}]({filename})", link_text(title)),
        None => "None (this is the last chapter)".to_string(),
    };

    let mut code = String::new();
    for &i in &abstraction.file_indices {
        if let Some(file) = files.get(i) {
            code.push_str(&file_block(i, file, opts.max_file_chars));
        }
    }
    if code.is_empty() {
        code.push_str("(no specific files listed for this abstraction)\n");
    }

    let language = language_note(&opts.language, "the entire chapter (prose, headings and code comments)");

    format!(
        r##"{language}Write a very beginner-friendly tutorial chapter (in Markdown format) for the project `{project}` about the concept: "{name}". This is Chapter {order}.

Concept Details:
- Name: {name}
- Description:
{description}

Project summary:
{summary}

Related concepts:
{related}
Complete Tutorial Structure:
{structure}
Previous chapter: {previous}
Next chapter: {next}

Relevant Code Snippets:
{code}
Instructions for the chapter:
- Start with the heading: `# Chapter {order}: {name}`
- If this is not the first chapter, begin with a brief transition from the previous chapter, linking to it with the Markdown link above.
- Begin with a high-level motivation: what problem does this concept solve? Use a concrete use case.
- Break complex ideas into smaller pieces and explain them one by one, like talking to a newcomer.
- Keep every code block under 10 lines; explain each one right after it.
- Where it helps, add a simple Mermaid diagram (`sequenceDiagram` or `flowchart`) in a ```mermaid fenced block, with at most 5 participants.
- When mentioning another concept covered in the tutorial, link to its chapter using the filenames in the structure above.
- Use analogies and examples a beginner can relate to.
- End with a short summary and a transition to the next chapter, linking to it if there is one.
- Output ONLY the Markdown content of this chapter."##,
        project = opts.project_name,
        name = abstraction.name,
        description = abstraction.description,
        summary = graph.project_summary,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use repotutor_llm::LlmError;
    use repotutor_llm::fake::ScriptedGenerator;
    use repotutor_shared::Relationship;

    use crate::pipeline::{SilentProgress, TutorialResult};
    use crate::testutil::gateway;

    fn abstractions() -> Vec<Abstraction> {
        ["Crawler", "Response Cache", "Gateway"]
            .iter()
            .enumerate()
            .map(|(i, name)| Abstraction {
                index: i,
                name: name.to_string(),
                description: format!("What {name} does"),
                file_indices: BTreeSet::from([i]),
            })
            .collect()
    }

    fn files() -> Vec<FileEntry> {
        vec![
            FileEntry::new("crawl.py", "def crawl(): pass\n"),
            FileEntry::new("cache.py", "CACHE = {}\n"),
            FileEntry::new("gateway.py", "def call(): pass\n"),
        ]
    }

    fn graph() -> RelationshipGraph {
        RelationshipGraph {
            project_summary: "Turns repositories into tutorials.".into(),
            relationships: vec![Relationship {
                source_index: 2,
                target_index: 1,
                label: "reads from".into(),
            }],
        }
    }

    fn opts(concurrency: usize) -> ChapterOptions {
        ChapterOptions {
            project_name: "demo".into(),
            language: "english".into(),
            concurrency,
            max_file_chars: 500,
        }
    }

    /// Answers with a heading and a diagram named after the requested concept.
    fn named_generator() -> ScriptedGenerator {
        ScriptedGenerator::responding(|req| {
            let name = req
                .prompt
                .split("about the concept: \"")
                .nth(1)
                .and_then(|rest| rest.split('"').next())
                .unwrap_or("unknown")
                .to_string();
            Ok(format!("# {name}\n\nAll about {name}.\n\n```mermaid\ngraph TD\n  A --> B\n```\n"))
        })
    }

    #[tokio::test]
    async fn chapters_follow_plan_order() {
        let plan = ChapterPlan::from_order(vec![2, 0, 1], 3).unwrap();
        let generator = Arc::new(named_generator().with_delay(Duration::from_millis(5)));

        let chapters = write_chapters(
            &plan,
            &abstractions(),
            &graph(),
            &files(),
            &opts(3),
            Arc::new(gateway(generator.clone())),
            &SilentProgress,
        )
        .await;

        let titles: Vec<&str> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Gateway", "Crawler", "Response Cache"]);
        assert_eq!(chapters[0].filename, "01_gateway.md");
        assert_eq!(chapters[2].filename, "03_response_cache.md");
        assert!(chapters[1].body.starts_with("# Chapter 2: Crawler\n"));
        assert_eq!(chapters[0].diagram_blocks.len(), 1);
        assert_eq!(generator.call_count(), 3);
    }

    /// Records chapter titles in completion order.
    #[derive(Default)]
    struct CompletionLog(Mutex<Vec<String>>);

    impl ProgressReporter for CompletionLog {
        fn phase(&self, _name: &str) {}
        fn stage_progress(&self, _current: usize, _total: usize, detail: &str) {
            self.0.lock().unwrap().push(detail.to_string());
        }
        fn done(&self, _result: &TutorialResult) {}
    }

    #[tokio::test]
    async fn slow_first_chapter_still_lands_first() {
        let plan = ChapterPlan::from_order(vec![2, 0, 1], 3).unwrap();
        // Later plan positions answer sooner.
        let generator = Arc::new(named_generator().with_delay_for(|req| {
            if req.prompt.contains("about the concept: \"Gateway\"") {
                Duration::from_millis(120)
            } else if req.prompt.contains("about the concept: \"Crawler\"") {
                Duration::from_millis(40)
            } else {
                Duration::ZERO
            }
        }));
        let log = CompletionLog::default();

        let chapters = write_chapters(
            &plan,
            &abstractions(),
            &graph(),
            &files(),
            &opts(3),
            Arc::new(gateway(generator.clone())),
            &log,
        )
        .await;

        let finished = log.0.lock().unwrap().clone();
        assert_eq!(finished.len(), 3);
        assert_eq!(finished.last().map(String::as_str), Some("Gateway"));

        let titles: Vec<&str> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Gateway", "Crawler", "Response Cache"]);
        let filenames: Vec<&str> = chapters.iter().map(|c| c.filename.as_str()).collect();
        assert_eq!(filenames, vec!["01_gateway.md", "02_crawler.md", "03_response_cache.md"]);
        let orders: Vec<usize> = chapters.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert!(chapters[0].body.starts_with("# Chapter 1: Gateway\n"));
        assert!(chapters.iter().all(|c| c.error.is_none()));
    }

    #[tokio::test]
    async fn prompt_links_neighbours_and_relationships() {
        let plan = ChapterPlan::from_order(vec![0, 1, 2], 3).unwrap();
        let generator = Arc::new(ScriptedGenerator::echo());

        write_chapters(
            &plan,
            &abstractions(),
            &graph(),
            &files(),
            &opts(1),
            Arc::new(gateway(generator.clone())),
            &SilentProgress,
        )
        .await;

        let prompt = generator
            .prompts()
            .into_iter()
            .find(|p| p.contains("about the concept: \"Response Cache\""))
            .unwrap();
        assert!(prompt.contains("Previous chapter: [Crawler](01_crawler.md)"));
        assert!(prompt.contains("Next chapter: [Gateway](03_gateway.md)"));
        assert!(prompt.contains("- Gateway reads from Response Cache"));
        assert!(prompt.contains("--- File 1 # cache.py ---"));
        assert!(prompt.contains("Turns repositories into tutorials."));
    }

    #[tokio::test]
    async fn bracketed_names_are_escaped_in_prompt_links() {
        let plan = ChapterPlan::from_order(vec![0, 1, 2], 3).unwrap();
        let mut abstractions = abstractions();
        abstractions[0].name = "Option[T] Crawler".into();
        let generator = Arc::new(ScriptedGenerator::echo());

        write_chapters(
            &plan,
            &abstractions,
            &graph(),
            &files(),
            &opts(1),
            Arc::new(gateway(generator.clone())),
            &SilentProgress,
        )
        .await;

        let prompt = generator
            .prompts()
            .into_iter()
            .find(|p| p.contains("about the concept: \"Response Cache\""))
            .unwrap();
        assert!(prompt.contains("1. [Option\\[T\\] Crawler](01_option_t_crawler.md)"));
        assert!(prompt.contains("Previous chapter: [Option\\[T\\] Crawler](01_option_t_crawler.md)"));
    }

    #[tokio::test]
    async fn failed_chapter_becomes_placeholder_without_affecting_siblings() {
        let plan = ChapterPlan::from_order(vec![0, 1, 2], 3).unwrap();
        let generator = Arc::new(ScriptedGenerator::responding(|req| {
            if req.prompt.contains("about the concept: \"Response Cache\"") {
                Err(LlmError::InvalidRequest("context too long".into()))
            } else {
                Ok("Body text".into())
            }
        }));

        let chapters = write_chapters(
            &plan,
            &abstractions(),
            &graph(),
            &files(),
            &opts(2),
            Arc::new(gateway(generator.clone())),
            &SilentProgress,
        )
        .await;

        assert_eq!(chapters.len(), 3);
        assert!(!chapters[0].is_placeholder());
        assert!(chapters[1].is_placeholder());
        assert!(chapters[1].body.contains("could not be generated"));
        assert!(chapters[1].body.starts_with("# Chapter 2: Response Cache"));
        assert!(!chapters[2].is_placeholder());
        // two successes plus the failing chapter's two chapter-level attempts
        assert_eq!(generator.call_count(), 4);
    }
}

//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use repotutor_core::pipeline::{ProgressReporter, Services, TutorialConfig, TutorialResult};
use repotutor_core::{DocumentExporter, MdToPdf, MermaidCli, generate_tutorial};
use repotutor_crawler::{GitHubRepo, RepoSource};
use repotutor_llm::{Gateway, OpenRouterClient};
use repotutor_shared::{AppConfig, CrawlConfig, expand_home, init_config, load_config};
use repotutor_storage::{CACHE_DB_NAME, ResponseCache, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// RepoTutor: explain a codebase to a newcomer.
#[derive(Parser)]
#[command(
    name = "repotutor",
    version,
    about = "Turn a GitHub repository or local directory into a beginner-friendly tutorial.",
    long_about = None,
    args_conflicts_with_subcommands = true,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub generate: GenerateArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Flags for tutorial generation (the default action).
#[derive(Args, Debug, Default)]
pub(crate) struct GenerateArgs {
    /// GitHub repository URL.
    #[arg(long, value_name = "URL", conflicts_with_all = ["dir", "zip"])]
    pub repo: Option<String>,

    /// Local directory to explain.
    #[arg(long, value_name = "PATH", conflicts_with = "zip")]
    pub dir: Option<PathBuf>,

    /// Zip archive of a repository to explain.
    #[arg(long, value_name = "FILE")]
    pub zip: Option<PathBuf>,

    /// Include glob patterns (repeatable or comma separated).
    #[arg(short, long, value_name = "GLOB", value_delimiter = ',')]
    pub include: Vec<String>,

    /// Exclude glob patterns (repeatable or comma separated).
    #[arg(short, long, value_name = "GLOB", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Maximum file size in bytes.
    #[arg(short = 's', long, value_name = "BYTES")]
    pub max_size: Option<u64>,

    /// Language the tutorial is written in.
    #[arg(long)]
    pub language: Option<String>,

    /// Upper bound on the number of abstractions (chapters).
    #[arg(long, value_name = "N")]
    pub max_abstractions: Option<usize>,

    /// Disable the response cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Output root directory.
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// GitHub token (falls back to the configured env var).
    #[arg(short, long)]
    pub token: Option<String>,

    /// Project name (defaults to the repository or directory name).
    #[arg(short, long)]
    pub name: Option<String>,

    /// Worker pool size for chapters and diagrams.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Model identifier override.
    #[arg(long)]
    pub model: Option<String>,

    /// Skip PDF export and keep the concatenated Markdown.
    #[arg(long)]
    pub no_export: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Response cache management.
    Cache {
        /// Cache subcommand.
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Remove every cached response.
    Clear,
    /// Show cache size and recent runs.
    Stats,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

const CRATES: [&str; 6] = [
    "repotutor_cli",
    "repotutor_core",
    "repotutor_crawler",
    "repotutor_llm",
    "repotutor_markdown",
    "repotutor_storage",
];

/// Initialize tracing based on CLI flags. `RUST_LOG` wins when set.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let directives = CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .fold(String::from("warn"), |acc, d| format!("{acc},{d}"));

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        None => cmd_generate(cli.generate).await,
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
        Some(Command::Cache { action }) => match action {
            CacheAction::Clear => cmd_cache_clear().await,
            CacheAction::Stats => cmd_cache_stats().await,
        },
    }
}

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

/// Fold CLI flags over the loaded config. Flags win.
fn apply_overrides(config: &mut AppConfig, args: &GenerateArgs) {
    if !args.include.is_empty() {
        config.crawl.include_patterns = args.include.clone();
    }
    if !args.exclude.is_empty() {
        config.crawl.exclude_patterns = args.exclude.clone();
    }
    if let Some(size) = args.max_size {
        config.crawl.max_file_size = size;
    }
    if let Some(language) = &args.language {
        config.defaults.language = language.clone();
    }
    if let Some(k) = args.max_abstractions {
        config.defaults.max_abstractions = k;
    }
    if let Some(output) = &args.output {
        config.defaults.output_dir = output.to_string_lossy().into_owned();
    }
    if let Some(n) = args.concurrency {
        config.defaults.concurrency = n.max(1);
    }
    if let Some(model) = &args.model {
        config.openrouter.default_model = model.clone();
    }
}

fn resolve_source(args: &GenerateArgs) -> Result<RepoSource> {
    match (&args.repo, &args.dir, &args.zip) {
        (Some(url), _, _) => Ok(RepoSource::GitHub(GitHubRepo::parse(url)?)),
        (None, Some(dir), _) => {
            if !dir.is_dir() {
                return Err(eyre!("'{}' is not a directory", dir.display()));
            }
            Ok(RepoSource::Local(dir.clone()))
        }
        (None, None, Some(zip)) => {
            if !zip.is_file() {
                return Err(eyre!("'{}' is not a file", zip.display()));
            }
            Ok(RepoSource::Archive(zip.clone()))
        }
        (None, None, None) => Err(eyre!(
            "one of --repo <URL>, --dir <PATH> or --zip <FILE> is required (see --help)"
        )),
    }
}

async fn cmd_generate(args: GenerateArgs) -> Result<()> {
    let mut config = load_config()?;
    apply_overrides(&mut config, &args);
    let source = resolve_source(&args)?;

    // Fail on a missing API key before crawling anything.
    let generator = Arc::new(OpenRouterClient::from_config(&config)?);

    let cache = if args.no_cache {
        Arc::new(ResponseCache::disabled())
    } else {
        Arc::new(ResponseCache::open(&expand_home(&config.defaults.cache_dir)).await?)
    };
    let gateway = Gateway::from_config(&config, None, generator, Arc::clone(&cache));

    let exporter = (!args.no_export)
        .then(|| Arc::new(MdToPdf::from_config(&config.render)) as Arc<dyn DocumentExporter>);
    let services = Services {
        gateway: Arc::new(gateway),
        cache,
        renderer: Arc::new(MermaidCli::from_config(&config.render)),
        exporter,
    };

    let mut crawl = CrawlConfig::from(&config);
    if let Some(token) = args.token {
        crawl.token = Some(token);
    }

    let name = args.name.unwrap_or_else(|| source.default_name());
    let tutorial_config = TutorialConfig {
        source,
        name: name.clone(),
        output_root: expand_home(&config.defaults.output_dir),
        language: config.defaults.language.clone(),
        max_abstractions: config.defaults.max_abstractions,
        concurrency: config.defaults.concurrency.max(1),
        crawl,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    info!(
        source = %tutorial_config.source,
        name = %name,
        model = %config.openrouter.default_model,
        cache = !args.no_cache,
        "generating tutorial"
    );

    let reporter = CliProgress::new();
    let result = match generate_tutorial(&tutorial_config, &services, &reporter).await {
        Ok(result) => result,
        Err(e) => {
            reporter.spinner.finish_and_clear();
            return Err(e.into());
        }
    };

    print_summary(&name, &result);
    Ok(())
}

fn print_summary(name: &str, result: &TutorialResult) {
    println!();
    println!("  Tutorial generated!");
    println!("  Name:      {name}");
    println!("  Chapters:  {}", result.chapter_count);
    println!("  Files:     {}", result.file_count);
    println!(
        "  Cache:     {} hits, {} misses, {} generator calls",
        result.cache.hits, result.cache.misses, result.cache.calls
    );
    println!("  Path:      {}", result.tutorial_dir.display());
    if let Some(document) = &result.document {
        println!("  Document:  {}", document.display());
    }
    println!("  Time:      {:.1}s", result.elapsed.as_secs_f64());

    if !result.degraded.is_empty() {
        println!();
        println!("  Completed with {} warning(s):", result.degraded.len());
        for unit in &result.degraded {
            println!("    [{}] {}: {}", unit.stage, unit.unit, unit.reason);
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn stage_progress(&self, current: usize, total: usize, detail: &str) {
        self.spinner
            .set_message(format!("Writing chapters [{current}/{total}] {detail}"));
    }

    fn done(&self, _result: &TutorialResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// config / cache
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn cache_dir() -> Result<PathBuf> {
    let config = load_config()?;
    Ok(expand_home(&config.defaults.cache_dir))
}

async fn cmd_cache_clear() -> Result<()> {
    let dir = cache_dir()?;
    let cache = ResponseCache::open(&dir).await?;
    let removed = cache.clear().await?;
    println!("Removed {removed} cached response(s) from {}", dir.display());
    Ok(())
}

async fn cmd_cache_stats() -> Result<()> {
    let dir = cache_dir()?;
    let db_path = dir.join(CACHE_DB_NAME);
    if !db_path.exists() {
        println!("No cache at {} yet.", dir.display());
        return Ok(());
    }

    let storage = Storage::open_readonly(&db_path).await?;
    let entries = storage.count_responses().await?;
    let runs = storage.list_runs(5).await?;

    println!();
    println!("  Cache:     {}", db_path.display());
    println!("  Entries:   {entries}");
    if !runs.is_empty() {
        println!();
        println!("  Recent runs:");
        for run in runs {
            let status = run.finished_at.as_deref().unwrap_or("unfinished");
            println!("    {} {} ({}) {status}", run.started_at, run.name, run.source);
        }
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("repotutor").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn patterns_split_on_commas_and_repeat() {
        let cli = parse(&["--dir", ".", "-i", "*.py,*.rs", "-i", "*.go", "-e", "*test*"]);
        assert_eq!(cli.generate.include, vec!["*.py", "*.rs", "*.go"]);
        assert_eq!(cli.generate.exclude, vec!["*test*"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn repo_and_dir_conflict() {
        let result = Cli::try_parse_from(["repotutor", "--repo", "https://github.com/a/b", "--dir", "."]);
        assert!(result.is_err());
        let result = Cli::try_parse_from(["repotutor", "--dir", ".", "--zip", "repo.zip"]);
        assert!(result.is_err());
    }

    #[test]
    fn zip_flag_selects_archive_source() {
        let zip = std::env::temp_dir().join(format!("rt-cli-{}.zip", std::process::id()));
        std::fs::write(&zip, b"PK").unwrap();
        let cli = parse(&["--zip", zip.to_str().unwrap()]);
        let source = resolve_source(&cli.generate).unwrap();
        assert_eq!(source, RepoSource::Archive(zip.clone()));

        let missing = parse(&["--zip", "/nonexistent/repo.zip"]);
        assert!(resolve_source(&missing.generate).is_err());
        let _ = std::fs::remove_file(&zip);
    }

    #[test]
    fn subcommands_parse() {
        let cli = parse(&["cache", "stats"]);
        assert!(matches!(
            cli.command,
            Some(Command::Cache {
                action: CacheAction::Stats
            })
        ));
    }

    #[test]
    fn flags_override_config() {
        let mut config = AppConfig::default();
        let cli = parse(&[
            "--dir",
            ".",
            "-s",
            "5000",
            "--language",
            "french",
            "--max-abstractions",
            "3",
            "--concurrency",
            "0",
            "--model",
            "other/model",
            "-o",
            "tutorials",
        ]);
        apply_overrides(&mut config, &cli.generate);

        assert_eq!(config.crawl.max_file_size, 5000);
        assert_eq!(config.defaults.language, "french");
        assert_eq!(config.defaults.max_abstractions, 3);
        assert_eq!(config.defaults.concurrency, 1);
        assert_eq!(config.openrouter.default_model, "other/model");
        assert_eq!(config.defaults.output_dir, "tutorials");
        // untouched values keep their defaults
        assert!(!config.crawl.include_patterns.is_empty());
    }

    #[test]
    fn source_is_required() {
        let err = resolve_source(&GenerateArgs::default()).unwrap_err();
        assert!(err.to_string().contains("--repo"));
    }
}

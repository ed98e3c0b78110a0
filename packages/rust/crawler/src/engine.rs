//! Repository crawler engine.
//!
//! The crawler enumerates a local directory or a GitHub repository, applies
//! the include/exclude/size rules, and returns files sorted by path.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use repotutor_shared::{CrawlConfig, FileEntry, RepoTutorError, Result};

use crate::filter::FileFilter;
use crate::sources;

/// User-Agent string for repository host requests.
const USER_AGENT: &str = concat!("RepoTutor/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Repository locators
// ---------------------------------------------------------------------------

/// Where the repository comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoSource {
    Local(PathBuf),
    GitHub(GitHubRepo),
    /// A zip archive of the repository, extracted before walking.
    Archive(PathBuf),
}

impl RepoSource {
    /// Default project name: the repository or directory name.
    pub fn default_name(&self) -> String {
        match self {
            Self::Local(path) => path
                .canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "project".into()),
            Self::GitHub(repo) => repo.repo.clone(),
            Self::Archive(path) => path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".into()),
        }
    }
}

impl std::fmt::Display for RepoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::GitHub(repo) => write!(f, "{repo}"),
            Self::Archive(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A GitHub repository, optionally pinned to a ref and narrowed to a subdirectory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRepo {
    pub owner: String,
    pub repo: String,
    /// Branch, tag or commit. `None` means the default branch.
    pub reference: Option<String>,
    /// Subdirectory to crawl, without leading or trailing `/`.
    pub subdir: Option<String>,
}

impl GitHubRepo {
    /// Parse `https://github.com/{owner}/{repo}[/tree/{ref}[/{subdir}]]`.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input)
            .map_err(|e| RepoTutorError::validation(format!("invalid repository URL {input:?}: {e}")))?;

        if url.host_str() != Some("github.com") && url.host_str() != Some("www.github.com") {
            return Err(RepoTutorError::validation(format!(
                "unsupported repository host in {input:?} (expected github.com)"
            )));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();

        let (owner, repo) = match segments.as_slice() {
            [owner, repo, ..] => (*owner, repo.trim_end_matches(".git")),
            _ => {
                return Err(RepoTutorError::validation(format!(
                    "repository URL {input:?} must name an owner and a repository"
                )));
            }
        };

        let (reference, subdir) = match segments.get(2..) {
            Some(["tree", reference, rest @ ..]) => {
                let subdir = (!rest.is_empty()).then(|| rest.join("/"));
                (Some(reference.to_string()), subdir)
            }
            _ => (None, None),
        };

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            reference,
            subdir,
        })
    }

    /// Ref used in API calls.
    pub fn reference_or_head(&self) -> &str {
        self.reference.as_deref().unwrap_or("HEAD")
    }
}

impl std::fmt::Display for GitHubRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "https://github.com/{}/{}", self.owner, self.repo)?;
        if let Some(reference) = &self.reference {
            write!(f, "/tree/{reference}")?;
            if let Some(subdir) = &self.subdir {
                write!(f, "/{subdir}")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CrawlResult
// ---------------------------------------------------------------------------

/// Why a file was left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    Excluded,
    NotIncluded,
    TooLarge { size: u64 },
    Unreadable { error: String },
}

impl SkipReason {
    /// Unreadable files are recorded warnings; the rest are plain filtering.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Unreadable { .. })
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Excluded => f.write_str("matched an exclude pattern"),
            Self::NotIncluded => f.write_str("matched no include pattern"),
            Self::TooLarge { size } => write!(f, "too large ({size} bytes)"),
            Self::Unreadable { error } => write!(f, "unreadable: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

/// Summary of a completed crawl.
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// Kept files, sorted by path.
    pub files: Vec<FileEntry>,
    pub skipped: Vec<SkippedFile>,
    pub duration: Duration,
}

impl CrawlResult {
    /// Skipped files that represent read failures.
    pub fn warnings(&self) -> impl Iterator<Item = &SkippedFile> {
        self.skipped.iter().filter(|s| s.reason.is_warning())
    }
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Repository crawler holding the compiled filter and the HTTP client.
pub struct Crawler {
    config: CrawlConfig,
    client: Client,
    filter: FileFilter,
}

impl Crawler {
    /// Create a new crawler with the given configuration.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RepoTutorError::Network(format!("failed to build HTTP client: {e}")))?;

        let filter = FileFilter::new(
            &config.include_patterns,
            &config.exclude_patterns,
            config.max_file_size,
        )?;

        Ok(Self {
            config,
            client,
            filter,
        })
    }

    /// Enumerate, filter and read every file of `source`.
    #[instrument(skip_all, fields(source = %source))]
    pub async fn crawl(&self, source: &RepoSource) -> Result<CrawlResult> {
        let start_time = std::time::Instant::now();

        info!(
            include = self.config.include_patterns.len(),
            exclude = self.config.exclude_patterns.len(),
            max_file_size = self.config.max_file_size,
            "starting crawl"
        );

        let (mut files, mut skipped) = match source {
            RepoSource::Local(root) => sources::local::crawl(root, &self.filter)?,
            RepoSource::GitHub(repo) => {
                sources::github::crawl(&self.client, repo, &self.config, &self.filter).await?
            }
            RepoSource::Archive(path) => sources::archive::crawl(path, &self.filter)?,
        };

        files.sort_by(|a, b| a.path.cmp(&b.path));
        skipped.sort_by(|a, b| a.path.cmp(&b.path));

        for skip in &skipped {
            if skip.reason.is_warning() {
                warn!(path = %skip.path, reason = %skip.reason, "skipping file");
            } else {
                debug!(path = %skip.path, reason = %skip.reason, "filtered out");
            }
        }

        let result = CrawlResult {
            files,
            skipped,
            duration: start_time.elapsed(),
        };

        info!(
            files = result.files.len(),
            skipped = result.skipped.len(),
            warnings = result.warnings().count(),
            duration_ms = result.duration.as_millis(),
            "crawl completed"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_repo_url() {
        let repo = GitHubRepo::parse("https://github.com/acme/widgets").unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.repo, "widgets");
        assert!(repo.reference.is_none());
        assert_eq!(repo.reference_or_head(), "HEAD");
    }

    #[test]
    fn parse_tree_url_with_subdir() {
        let repo =
            GitHubRepo::parse("https://github.com/acme/widgets/tree/v2/src/engine/").unwrap();
        assert_eq!(repo.reference.as_deref(), Some("v2"));
        assert_eq!(repo.subdir.as_deref(), Some("src/engine"));
        assert_eq!(
            repo.to_string(),
            "https://github.com/acme/widgets/tree/v2/src/engine"
        );
    }

    #[test]
    fn parse_strips_git_suffix() {
        let repo = GitHubRepo::parse("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(repo.repo, "widgets");
    }

    #[test]
    fn parse_rejects_other_hosts_and_short_paths() {
        assert!(GitHubRepo::parse("https://gitlab.com/acme/widgets").is_err());
        assert!(GitHubRepo::parse("https://github.com/acme").is_err());
        assert!(GitHubRepo::parse("not a url").is_err());
    }

    #[test]
    fn default_name_from_source() {
        let gh = RepoSource::GitHub(GitHubRepo::parse("https://github.com/acme/widgets").unwrap());
        assert_eq!(gh.default_name(), "widgets");
        let local = RepoSource::Local(PathBuf::from("/nonexistent/my-project"));
        assert_eq!(local.default_name(), "my-project");
        let archive = RepoSource::Archive(PathBuf::from("/downloads/widgets-main.zip"));
        assert_eq!(archive.default_name(), "widgets-main");
        assert_eq!(archive.to_string(), "/downloads/widgets-main.zip");
    }

    #[test]
    fn skip_reason_display() {
        assert_eq!(
            SkipReason::TooLarge { size: 5 }.to_string(),
            "too large (5 bytes)"
        );
        assert!(SkipReason::Unreadable { error: "x".into() }.is_warning());
        assert!(!SkipReason::Excluded.is_warning());
    }
}

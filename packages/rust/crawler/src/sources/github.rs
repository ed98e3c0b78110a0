//! GitHub backend: one recursive tree listing, then concurrent raw downloads.

use std::sync::Arc;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use repotutor_shared::{CrawlConfig, FileEntry, RepoTutorError, Result};

use super::SourceOutput;
use crate::engine::{GitHubRepo, SkipReason, SkippedFile};
use crate::filter::FileFilter;

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

/// A blob selected for download.
struct Candidate {
    /// Path inside the repository.
    full_path: String,
    /// Path relative to the crawled subdirectory.
    rel_path: String,
}

pub(crate) async fn crawl(
    client: &Client,
    repo: &GitHubRepo,
    config: &CrawlConfig,
    filter: &FileFilter,
) -> Result<SourceOutput> {
    let tree = fetch_tree(client, repo, config).await?;
    if tree.truncated {
        warn!(repo = %repo, "GitHub truncated the tree listing; some files are missing");
    }

    let prefix = repo.subdir.as_ref().map(|s| format!("{s}/"));
    let mut candidates = Vec::new();
    let mut skipped = Vec::new();

    for item in tree.tree {
        if item.kind != "blob" {
            continue;
        }
        let rel_path = match &prefix {
            Some(prefix) => match item.path.strip_prefix(prefix.as_str()) {
                Some(rel) => rel.to_string(),
                None => continue,
            },
            None => item.path.clone(),
        };

        if let Some(reason) = filter.check_path(&rel_path) {
            skipped.push(SkippedFile {
                path: rel_path,
                reason,
            });
            continue;
        }
        if let Some(reason) = item.size.and_then(|size| filter.check_size(size)) {
            skipped.push(SkippedFile {
                path: rel_path,
                reason,
            });
            continue;
        }
        candidates.push(Candidate {
            full_path: item.path,
            rel_path,
        });
    }

    debug!(candidates = candidates.len(), "downloading selected blobs");

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut set = JoinSet::new();
    let raw_base = format!(
        "{}/{}/{}/{}",
        config.github_raw_url.trim_end_matches('/'),
        repo.owner,
        repo.repo,
        repo.reference_or_head()
    );

    for candidate in candidates {
        let client = client.clone();
        let sem = semaphore.clone();
        let token = config.token.clone();
        let url = format!("{raw_base}/{}", candidate.full_path);

        set.spawn(async move {
            let _permit = sem.acquire_owned().await;
            let outcome = fetch_raw(&client, &url, token.as_deref()).await;
            (candidate.rel_path, outcome)
        });
    }

    let mut files = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((path, Ok(content))) => {
                let entry = FileEntry::new(path, content);
                match filter.check_size(entry.size) {
                    Some(reason) => skipped.push(SkippedFile {
                        path: entry.path,
                        reason,
                    }),
                    None => files.push(entry),
                }
            }
            Ok((path, Err(error))) => skipped.push(SkippedFile {
                path,
                reason: SkipReason::Unreadable { error },
            }),
            Err(e) => warn!(error = %e, "download task failed"),
        }
    }

    Ok((files, skipped))
}

async fn fetch_tree(client: &Client, repo: &GitHubRepo, config: &CrawlConfig) -> Result<TreeResponse> {
    let url = format!(
        "{}/repos/{}/{}/git/trees/{}?recursive=1",
        config.github_api_url.trim_end_matches('/'),
        repo.owner,
        repo.repo,
        repo.reference_or_head()
    );

    let mut request = client
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json");
    if let Some(token) = &config.token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| RepoTutorError::Network(format!("{url}: {e}")))?;
    let response = check_status(response, repo).await?;

    response
        .json::<TreeResponse>()
        .await
        .map_err(|e| RepoTutorError::parse(format!("unexpected tree listing from {url}: {e}")))
}

/// Map fatal HTTP statuses of the tree listing to errors.
async fn check_status(response: Response, repo: &GitHubRepo) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let rate_limited = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");

    match status {
        StatusCode::UNAUTHORIZED => Err(RepoTutorError::Auth(format!(
            "GitHub rejected the access token for {repo} (HTTP 401)"
        ))),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS if rate_limited => {
            Err(RepoTutorError::Auth(format!(
                "GitHub API rate limit exhausted while listing {repo}; provide a token with --token"
            )))
        }
        StatusCode::FORBIDDEN => Err(RepoTutorError::Auth(format!(
            "access to {repo} is forbidden (HTTP 403)"
        ))),
        StatusCode::NOT_FOUND => Err(RepoTutorError::Network(format!(
            "repository {repo} or ref {} not found (HTTP 404); private repositories need a token",
            repo.reference_or_head()
        ))),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(RepoTutorError::Network(format!(
                "listing {repo} failed with HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )))
        }
    }
}

async fn fetch_raw(
    client: &Client,
    url: &str,
    token: Option<&str>,
) -> std::result::Result<String, String> {
    let mut request = client.get(url);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    let bytes = response.bytes().await.map_err(|e| e.to_string())?;
    String::from_utf8(bytes.to_vec()).map_err(|_| "not valid UTF-8".to_string())
}

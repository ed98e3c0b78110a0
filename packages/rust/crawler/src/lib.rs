//! Repository crawling for RepoTutor.
//!
//! This crate provides:
//! - [`Crawler`], which reads a local directory or a GitHub repository
//! - [`FileFilter`], the include/exclude/size rules applied to every path
//! - [`RepoSource`] / [`GitHubRepo`], the repository locators

pub mod engine;
pub mod filter;
mod sources;

pub use engine::{CrawlResult, Crawler, GitHubRepo, RepoSource, SkipReason, SkippedFile};
pub use filter::FileFilter;

#[cfg(test)]
mod tests {
    use super::*;
    use repotutor_shared::CrawlConfig;
    use uuid::Uuid;

    fn config(include: &[&str], exclude: &[&str]) -> CrawlConfig {
        CrawlConfig {
            include_patterns: include.iter().map(|s| s.to_string()).collect(),
            exclude_patterns: exclude.iter().map(|s| s.to_string()).collect(),
            max_file_size: 100_000,
            token: None,
            concurrency: 2,
            github_api_url: "http://127.0.0.1:9".into(),
            github_raw_url: "http://127.0.0.1:9".into(),
        }
    }

    #[tokio::test]
    async fn crawl_is_sorted_and_repeatable() {
        let root = std::env::temp_dir().join(format!("rt-crawl-{}", Uuid::now_v7()));
        for name in ["zeta.py", "alpha.py", "mid/beta.py", "mid/test_beta.py"] {
            let full = root.join(name);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, format!("# {name}\n")).unwrap();
        }

        let crawler = Crawler::new(config(&["*.py"], &["*test*"])).unwrap();
        let source = RepoSource::Local(root.clone());

        let first = crawler.crawl(&source).await.unwrap();
        let second = crawler.crawl(&source).await.unwrap();

        let paths: Vec<&str> = first.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["alpha.py", "mid/beta.py", "zeta.py"]);
        assert_eq!(first.files, second.files);
        assert_eq!(first.warnings().count(), 0);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn unreachable_remote_is_fatal() {
        let crawler = Crawler::new(config(&[], &[])).unwrap();
        let repo = GitHubRepo::parse("https://github.com/acme/widgets").unwrap();
        let err = crawler.crawl(&RepoSource::GitHub(repo)).await.unwrap_err();
        assert!(matches!(err, repotutor_shared::RepoTutorError::Network(_)));
    }
}

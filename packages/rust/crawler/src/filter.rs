//! Include/exclude glob filtering over repository-relative paths.

use globset::{Glob, GlobSet, GlobSetBuilder};

use repotutor_shared::{RepoTutorError, Result};

use crate::engine::SkipReason;

/// Compiled include/exclude rules.
///
/// Patterns are matched against the full relative path and against the file
/// name, so `Dockerfile` matches `docker/Dockerfile`. `*` may cross `/`.
#[derive(Debug, Clone)]
pub struct FileFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
    max_file_size: u64,
}

impl FileFilter {
    pub fn new(include: &[String], exclude: &[String], max_file_size: u64) -> Result<Self> {
        let include = if include.is_empty() {
            None
        } else {
            Some(build_set(include)?)
        };
        Ok(Self {
            include,
            exclude: build_set(exclude)?,
            max_file_size,
        })
    }

    /// Decide on a path before its content is read.
    ///
    /// Returns `None` when the path should be kept.
    pub fn check_path(&self, path: &str) -> Option<SkipReason> {
        let name = path.rsplit('/').next().unwrap_or(path);

        if self.exclude.is_match(path) || self.exclude.is_match(name) {
            return Some(SkipReason::Excluded);
        }
        if let Some(include) = &self.include {
            if !include.is_match(path) && !include.is_match(name) {
                return Some(SkipReason::NotIncluded);
            }
        }
        None
    }

    /// Decide on a file size in bytes.
    pub fn check_size(&self, size: u64) -> Option<SkipReason> {
        (size > self.max_file_size).then_some(SkipReason::TooLarge { size })
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            RepoTutorError::validation(format!("invalid glob pattern {pattern:?}: {e}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RepoTutorError::validation(format!("failed to compile globs: {e}")))
}

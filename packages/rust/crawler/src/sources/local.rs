//! Local directory backend.

use std::path::Path;

use walkdir::WalkDir;

use repotutor_shared::{FileEntry, RepoTutorError, Result};

use super::SourceOutput;
use crate::engine::{SkipReason, SkippedFile};
use crate::filter::FileFilter;

/// Directory names never descended into.
const SKIP_DIRS: &[&str] = &[".git", ".hg", ".svn"];

pub(crate) fn crawl(root: &Path, filter: &FileFilter) -> Result<SourceOutput> {
    let meta = std::fs::metadata(root).map_err(|e| RepoTutorError::io(root, e))?;
    if !meta.is_dir() {
        return Err(RepoTutorError::validation(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let mut skipped = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.depth() > 0
                && SKIP_DIRS.iter().any(|d| e.file_name() == *d))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let path = e.path().unwrap_or(root).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                return Err(RepoTutorError::io(path, source));
            }
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| relative_path(root, p))
                    .unwrap_or_default();
                skipped.push(SkippedFile {
                    path,
                    reason: SkipReason::Unreadable {
                        error: e.to_string(),
                    },
                });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let rel = relative_path(root, entry.path());

        if let Some(reason) = filter.check_path(&rel) {
            skipped.push(SkippedFile { path: rel, reason });
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                skipped.push(SkippedFile {
                    path: rel,
                    reason: SkipReason::Unreadable {
                        error: e.to_string(),
                    },
                });
                continue;
            }
        };
        if let Some(reason) = filter.check_size(size) {
            skipped.push(SkippedFile { path: rel, reason });
            continue;
        }

        match read_utf8(entry.path()) {
            Ok(content) => files.push(FileEntry::new(rel, content)),
            Err(error) => skipped.push(SkippedFile {
                path: rel,
                reason: SkipReason::Unreadable { error },
            }),
        }
    }

    Ok((files, skipped))
}

fn read_utf8(path: &Path) -> std::result::Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())
}

/// `/`-separated path relative to `root`.
fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

//! Zip archive backend: extract into a scratch directory, then walk it.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use repotutor_shared::{RepoTutorError, Result};

use super::SourceOutput;
use super::local;
use crate::filter::FileFilter;

pub(crate) fn crawl(archive: &Path, filter: &FileFilter) -> Result<SourceOutput> {
    let file = File::open(archive).map_err(|e| RepoTutorError::io(archive, e))?;
    let mut zip = ZipArchive::new(file).map_err(|e| {
        RepoTutorError::validation(format!(
            "{} is not a readable zip archive: {e}",
            archive.display()
        ))
    })?;

    let scratch = tempfile::Builder::new()
        .prefix("repotutor-archive-")
        .tempdir()
        .map_err(|e| RepoTutorError::io(std::env::temp_dir(), e))?;

    zip.extract(scratch.path()).map_err(|e| {
        RepoTutorError::validation(format!("failed to extract {}: {e}", archive.display()))
    })?;
    debug!(entries = zip.len(), scratch = %scratch.path().display(), "archive extracted");

    let root = content_root(scratch.path());
    local::crawl(&root, filter)
}

/// A lone top-level directory (`repo-main/` in GitHub downloads) becomes the root.
fn content_root(dir: &Path) -> PathBuf {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return dir.to_path_buf();
    };
    let entries: Vec<_> = entries.flatten().collect();
    match entries.as_slice() {
        [only] if only.file_type().is_ok_and(|t| t.is_dir()) => only.path(),
        _ => dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use uuid::Uuid;
    use zip::write::SimpleFileOptions;

    use crate::engine::SkipReason;

    fn write_zip(entries: &[(&str, &str)]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rt-archive-{}.zip", Uuid::now_v7()));
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wrapped_archive_uses_inner_directory_as_root() {
        let zip = write_zip(&[
            ("widgets-main/main.py", "print('main')\n"),
            ("widgets-main/pkg/utils.py", "def helper(): pass\n"),
            ("widgets-main/test_main.py", "def test(): pass\n"),
        ]);
        let filter = FileFilter::new(&strings(&["*.py"]), &strings(&["*test*"]), 100_000).unwrap();

        let (mut files, skipped) = crawl(&zip, &filter).unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["main.py", "pkg/utils.py"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].reason, SkipReason::Excluded);

        let _ = std::fs::remove_file(&zip);
    }

    #[test]
    fn flat_archive_keeps_its_layout() {
        let zip = write_zip(&[("a.py", "a = 1\n"), ("src/b.py", "b = 2\n")]);
        let filter = FileFilter::new(&[], &[], 100_000).unwrap();

        let (mut files, _) = crawl(&zip, &filter).unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "src/b.py"]);
        assert_eq!(files[1].content, "b = 2\n");

        let _ = std::fs::remove_file(&zip);
    }

    #[test]
    fn non_zip_file_is_a_validation_error() {
        let path = std::env::temp_dir().join(format!("rt-notzip-{}.zip", Uuid::now_v7()));
        std::fs::write(&path, "plain text").unwrap();
        let filter = FileFilter::new(&[], &[], 100_000).unwrap();

        let err = crawl(&path, &filter).unwrap_err();
        assert!(matches!(err, RepoTutorError::Validation { .. }));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_archive_is_an_io_error() {
        let path = std::env::temp_dir().join(format!("rt-missing-{}.zip", Uuid::now_v7()));
        let filter = FileFilter::new(&[], &[], 100_000).unwrap();
        assert!(matches!(crawl(&path, &filter).unwrap_err(), RepoTutorError::Io { .. }));
    }
}

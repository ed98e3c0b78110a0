//! Repository backends. Each returns kept files and skipped paths, unsorted.

pub mod archive;
pub mod github;
pub mod local;

use repotutor_shared::FileEntry;

use crate::engine::SkippedFile;

pub(crate) type SourceOutput = (Vec<FileEntry>, Vec<SkippedFile>);

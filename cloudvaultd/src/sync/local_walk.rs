use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use super::engine::EngineError;
use super::paths::relative_path_of;
use super::transfer::is_partial_download;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub absolute_path: PathBuf,
    /// `/`-separated, relative to the sync root.
    pub relative_path: String,
    pub modified: Option<SystemTime>,
    pub size: u64,
}

/// Lists every regular file under `root`, sorted by path. Directories are
/// traversed but not reported; symlinks are neither followed nor reported.
/// Our own `.partial` downloads are left out.
///
/// Only a failure to read `root` itself is an error. Entries that vanish or
/// are unreadable below it are logged and skipped.
pub async fn walk_local_tree(root: &Path) -> Result<Vec<LocalEntry>, EngineError> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || walk_blocking(&root)).await?
}

fn walk_blocking(root: &Path) -> Result<Vec<LocalEntry>, EngineError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() > 0 && err.io_error().is_some_and(is_skippable) => {
                tracing::warn!(path = ?err.path(), %err, "skipping unreadable local entry");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if !entry.file_type().is_file() || is_partial_download(entry.file_name()) {
            continue;
        }
        let relative_path = match relative_path_of(root, entry.path()) {
            Ok(relative) => relative,
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), %err, "skipping local file");
                continue;
            }
        };
        if let Some(local) = stat_entry(entry.path(), relative_path)? {
            entries.push(local);
        }
    }
    Ok(entries)
}

/// `None` when the file disappeared or became unreadable after its directory
/// was listed.
fn stat_entry(path: &Path, relative_path: String) -> Result<Option<LocalEntry>, EngineError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if is_skippable(&err) => {
            tracing::warn!(path = %path.display(), %err, "skipping local file");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    Ok(Some(LocalEntry {
        absolute_path: path.to_path_buf(),
        relative_path,
        modified: metadata.modified().ok(),
        size: metadata.len(),
    }))
}

fn is_skippable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
    )
}

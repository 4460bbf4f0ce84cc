use std::ffi::OsStr;
use std::path::Path;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::transfer::is_partial_download;

/// Watches `root` recursively. The channel carries one unit per relevant
/// filesystem event; the debounce loop only counts them.
pub fn start_notify_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = root.to_path_buf();
    let watch_root = root.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if is_relevant(&watch_root, &event) {
                tracing::trace!(paths = ?event.paths, kind = ?event.kind, "local change");
                let _ = tx.send(());
            }
        }
        Err(err) => tracing::warn!(%err, "filesystem watcher error"),
    })?;
    watcher.watch(root.as_path(), RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

/// Editor swap files, `*.tmp` and our own in-flight downloads.
fn is_transient_name(name: &OsStr) -> bool {
    if is_partial_download(name) {
        return true;
    }
    let name = name.to_string_lossy();
    name.contains('~') || name.ends_with(".tmp")
}

fn is_relevant(root: &Path, event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|path| is_relevant_path(root, path))
}

fn is_relevant_path(root: &Path, path: &Path) -> bool {
    path != root && path.starts_with(root) && !path.file_name().is_some_and(is_transient_name)
}

use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;

use cloudvault_core::{RemoteFile, RemoteId, RemoteStore};
use time::OffsetDateTime;

use super::engine::EngineError;
use super::events::{PHASE_DOWNLOADING, PHASE_UPLOADING, Progress};
use super::local_walk::{LocalEntry, walk_local_tree};
use super::paths::{join_relative, local_path_for, split_parent, validate_name};
use super::transfer::{stamp_modified, system_millis, unix_millis, write_file_atomically};
use super::tree::RemoteTree;

pub const UPLOAD_MIME_TYPE: &str = "application/octet-stream";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PullStats {
    pub files: usize,
    pub downloaded: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushStats {
    pub files: usize,
    pub uploaded: usize,
    pub unchanged: usize,
    pub no_destination: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub pull: PullStats,
    pub push: PushStats,
}

enum UploadOutcome {
    Uploaded,
    NoDestination,
}

/// One pull-then-push reconciliation of `root` against `store`.
pub struct Reconciler<'a> {
    store: &'a dyn RemoteStore,
    root: &'a Path,
    report: &'a (dyn Fn(Progress) + Send + Sync),
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn RemoteStore,
        root: &'a Path,
        report: &'a (dyn Fn(Progress) + Send + Sync),
    ) -> Self {
        Self {
            store,
            root,
            report,
        }
    }

    pub async fn run(&self) -> Result<PassStats, EngineError> {
        ensure_local_dir(self.root).await?;
        let pull = self.pull().await?;
        let push = self.push().await?;
        Ok(PassStats { pull, push })
    }

    pub async fn pull(&self) -> Result<PullStats, EngineError> {
        let tree = RemoteTree::fetch(self.store).await?;

        let mut folders: Vec<(String, Option<RemoteId>)> = Vec::with_capacity(tree.len() + 1);
        for (relative, id) in tree.paths() {
            let dir = match local_path_for(self.root, relative) {
                Ok(dir) => dir,
                Err(err) => {
                    tracing::warn!(path = relative, %err, "skipping remote folder");
                    continue;
                }
            };
            ensure_local_dir(&dir).await?;
            folders.push((relative.to_string(), Some(id.clone())));
        }
        folders.push((String::new(), None));

        let mut worklist: Vec<(String, RemoteFile)> = Vec::new();
        for (relative, id) in &folders {
            for file in self.store.list_files(id.as_ref()).await? {
                worklist.push((relative.clone(), file));
            }
        }

        let total = worklist.len();
        let mut stats = PullStats {
            files: total,
            ..PullStats::default()
        };
        (self.report)(Progress::new(0, total, PHASE_DOWNLOADING));
        for (index, (relative, file)) in worklist.iter().enumerate() {
            match self.pull_file(relative, file).await {
                Ok(true) => stats.downloaded += 1,
                Ok(false) => {}
                Err(err) => {
                    stats.failed += 1;
                    tracing::warn!(
                        path = %join_relative(relative, &file.name),
                        id = %file.id,
                        %err,
                        class = ?err.api_class(),
                        "download failed, skipping"
                    );
                }
            }
            (self.report)(Progress::new(index + 1, total, PHASE_DOWNLOADING));
        }
        tracing::debug!(?stats, "pull finished");
        Ok(stats)
    }

    async fn pull_file(&self, relative_dir: &str, file: &RemoteFile) -> Result<bool, EngineError> {
        if file.name.is_empty() {
            tracing::warn!(id = %file.id, "remote file has no name, skipping");
            return Ok(false);
        }
        let name = validate_name(&file.name)?;
        let target = local_path_for(self.root, &join_relative(relative_dir, name))?;
        let remote_modified = file.modified_at();
        let local_modified = match tokio::fs::metadata(&target).await {
            Ok(meta) => Some(meta.modified().ok()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        if !needs_download(local_modified, remote_modified) {
            return Ok(false);
        }
        let bytes = self.store.download_file_bytes(&file.id).await?;
        write_file_atomically(&target, &bytes, remote_modified).await?;
        tracing::debug!(path = %target.display(), bytes = bytes.len(), "downloaded");
        Ok(true)
    }

    pub async fn push(&self) -> Result<PushStats, EngineError> {
        let mut tree = RemoteTree::fetch(self.store).await?;
        let entries = walk_local_tree(self.root).await?;
        let mut remote_files: HashMap<Option<RemoteId>, HashMap<String, RemoteFile>> =
            HashMap::new();

        let total = entries.len();
        let mut stats = PushStats {
            files: total,
            ..PushStats::default()
        };
        (self.report)(Progress::new(0, total, PHASE_UPLOADING));
        for (index, entry) in entries.iter().enumerate() {
            let (relative_dir, name) = split_parent(&entry.relative_path);
            let folder_id = tree.ensure_path(self.store, relative_dir).await?;

            if !remote_files.contains_key(&folder_id) {
                let listed = self
                    .store
                    .list_files(folder_id.as_ref())
                    .await?
                    .into_iter()
                    .map(|file| (file.name.clone(), file))
                    .collect();
                remote_files.insert(folder_id.clone(), listed);
            }
            let existing = remote_files
                .get(&folder_id)
                .and_then(|files| files.get(name));
            if existing.is_some_and(|remote| !is_newer_locally(entry.modified, remote.modified_at()))
            {
                stats.unchanged += 1;
            } else {
                match self.push_file(entry, name, folder_id.as_ref()).await {
                    Ok(UploadOutcome::Uploaded) => stats.uploaded += 1,
                    Ok(UploadOutcome::NoDestination) => {
                        stats.no_destination += 1;
                        tracing::warn!(path = %entry.relative_path, "no upload destination, skipping");
                    }
                    Err(err) => {
                        stats.failed += 1;
                        tracing::warn!(
                            path = %entry.relative_path,
                            %err,
                            class = ?err.api_class(),
                            "upload failed, skipping"
                        );
                    }
                }
            }
            (self.report)(Progress::new(index + 1, total, PHASE_UPLOADING));
        }
        tracing::debug!(?stats, "push finished");
        Ok(stats)
    }

    async fn push_file(
        &self,
        entry: &LocalEntry,
        name: &str,
        folder_id: Option<&RemoteId>,
    ) -> Result<UploadOutcome, EngineError> {
        let bytes = tokio::fs::read(&entry.absolute_path).await?;
        let size = bytes.len() as u64;
        let Some(destination) = self
            .store
            .request_upload_destination(name, UPLOAD_MIME_TYPE, folder_id)
            .await?
        else {
            return Ok(UploadOutcome::NoDestination);
        };
        self.store
            .put_bytes(&destination.upload_url, bytes, UPLOAD_MIME_TYPE)
            .await?;
        let registered = self
            .store
            .register_uploaded_file(&destination.storage_path, name, UPLOAD_MIME_TYPE, size)
            .await?;
        if let Some(modified) = registered.modified_at()
            && let Err(err) = stamp_modified(&entry.absolute_path, modified).await
        {
            tracing::warn!(path = %entry.relative_path, %err, "failed to stamp uploaded file");
        }
        tracing::debug!(path = %entry.relative_path, size, "uploaded");
        Ok(UploadOutcome::Uploaded)
    }
}

/// `local` is `None` when no file exists, `Some(None)` when it exists but its
/// mtime is unavailable. An unknown remote time never forces a download.
pub fn needs_download(
    local: Option<Option<SystemTime>>,
    remote: Option<OffsetDateTime>,
) -> bool {
    match (local, remote) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(None), Some(_)) => true,
        (Some(Some(local)), Some(remote)) => system_millis(local) < unix_millis(remote),
    }
}

pub fn is_newer_locally(local: Option<SystemTime>, remote: Option<OffsetDateTime>) -> bool {
    match (local, remote) {
        (Some(local), Some(remote)) => system_millis(local) > unix_millis(remote),
        _ => false,
    }
}

async fn ensure_local_dir(dir: &Path) -> Result<(), EngineError> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::NotADirectory(dir.to_path_buf())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(dir).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;

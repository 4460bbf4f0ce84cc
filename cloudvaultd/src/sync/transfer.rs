use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

pub const PARTIAL_SUFFIX: &str = ".partial";

/// True for our own in-flight download files.
pub fn is_partial_download(name: &OsStr) -> bool {
    name.as_encoded_bytes().ends_with(PARTIAL_SUFFIX.as_bytes())
}

/// Writes `bytes` next to `target`, stamps the modification time and renames
/// the file into place, so readers never see a half-written file.
pub async fn write_file_atomically(
    target: &Path,
    bytes: &[u8],
    modified: Option<OffsetDateTime>,
) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(target);
    let result = write_partial(&partial, bytes, modified).await;
    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err);
    }
    if let Err(err) = tokio::fs::rename(&partial, target).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err);
    }
    Ok(())
}

async fn write_partial(
    partial: &Path,
    bytes: &[u8],
    modified: Option<OffsetDateTime>,
) -> io::Result<()> {
    let mut file = tokio::fs::File::create(partial).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    if let Some(modified) = modified {
        stamp_modified(partial, modified).await?;
    }
    Ok(())
}

pub async fn stamp_modified(path: &Path, modified: OffsetDateTime) -> io::Result<()> {
    let path = path.to_path_buf();
    let when = SystemTime::from(modified);
    tokio::task::spawn_blocking(move || {
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)?
            .set_modified(when)
    })
    .await
    .map_err(io::Error::other)?
}

pub fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

/// Milliseconds since the epoch; both sides are compared at this precision.
pub fn unix_millis(value: OffsetDateTime) -> i128 {
    value.unix_timestamp_nanos() / 1_000_000
}

pub fn system_millis(value: SystemTime) -> i128 {
    unix_millis(OffsetDateTime::from(value))
}

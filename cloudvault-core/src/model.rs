use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Opaque entity id. The backend hands out either numbers or strings; the
/// original representation is kept so it can be echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RemoteId {
    Number(i64),
    Text(String),
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteId::Number(value) => write!(f, "{value}"),
            RemoteId::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for RemoteId {
    fn from(value: i64) -> Self {
        RemoteId::Number(value)
    }
}

impl From<&str> for RemoteId {
    fn from(value: &str) -> Self {
        RemoteId::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawFolder")]
pub struct RemoteFolder {
    pub id: RemoteId,
    pub name: String,
    pub parent_id: Option<RemoteId>,
}

#[derive(Deserialize)]
struct RawFolder {
    id: RemoteId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    folder_name: Option<String>,
    #[serde(default)]
    parent_id: Option<RemoteId>,
}

impl From<RawFolder> for RemoteFolder {
    fn from(raw: RawFolder) -> Self {
        Self {
            id: raw.id,
            name: raw.name.or(raw.folder_name).unwrap_or_default(),
            parent_id: raw.parent_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawFile")]
pub struct RemoteFile {
    pub id: RemoteId,
    pub name: String,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    /// `updated_at`, or `created_at` when the record was never updated.
    pub updated_at: Option<String>,
    pub folder_id: Option<RemoteId>,
}

impl RemoteFile {
    /// Parsed modification time; `None` when missing or not RFC 3339.
    pub fn modified_at(&self) -> Option<OffsetDateTime> {
        parse_timestamp(self.updated_at.as_deref())
    }
}

#[derive(Deserialize)]
struct RawFile {
    id: RemoteId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    folder_id: Option<RemoteId>,
}

impl From<RawFile> for RemoteFile {
    fn from(raw: RawFile) -> Self {
        Self {
            id: raw.id,
            name: raw
                .name
                .or(raw.file_name)
                .or(raw.filename)
                .unwrap_or_default(),
            size: raw.size,
            mime_type: raw.mime_type,
            updated_at: raw.updated_at.or(raw.created_at),
            folder_id: raw.folder_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadDestination {
    pub upload_url: String,
    pub storage_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegisteredFile {
    #[serde(default)]
    pub id: Option<RemoteId>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RegisteredFile {
    pub fn modified_at(&self) -> Option<OffsetDateTime> {
        parse_timestamp(self.updated_at.as_deref())
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value?, &Rfc3339).ok()
}

/// List responses come either as a bare array or wrapped in an object.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum ListEnvelope<T> {
    Bare(Vec<T>),
    Wrapped(WrappedList<T>),
}

#[derive(Deserialize)]
pub(crate) struct WrappedList<T> {
    #[serde(default = "Option::default")]
    data: Option<Vec<T>>,
    #[serde(default = "Option::default")]
    folders: Option<Vec<T>>,
    #[serde(default = "Option::default")]
    files: Option<Vec<T>>,
    #[serde(default = "Option::default")]
    items: Option<Vec<T>>,
}

impl<T> ListEnvelope<T> {
    pub(crate) fn into_items(self) -> Vec<T> {
        match self {
            ListEnvelope::Bare(items) => items,
            ListEnvelope::Wrapped(wrapped) => wrapped
                .data
                .or(wrapped.folders)
                .or(wrapped.files)
                .or(wrapped.items)
                .unwrap_or_default(),
        }
    }
}

/// Single-record responses, optionally wrapped in `{"data": ...}`.
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum SingleEnvelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> SingleEnvelope<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            SingleEnvelope::Wrapped { data } => data,
            SingleEnvelope::Bare(inner) => inner,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct CreatedRecord {
    #[serde(default)]
    pub(crate) id: Option<RemoteId>,
}

#[derive(Deserialize)]
pub(crate) struct RawUploadDestination {
    #[serde(default)]
    pub(crate) upload_url: Option<String>,
    #[serde(default)]
    pub(crate) storage_path: Option<String>,
}

/// JSON body of a download response that points at a signed URL instead of
/// carrying the bytes.
#[derive(Deserialize)]
pub(crate) struct IndirectDownload {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    signed_url: Option<String>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
}

impl IndirectDownload {
    pub(crate) fn into_url(self) -> Option<String> {
        self.url
            .or(self.signed_url)
            .or(self.download_url)
            .or(self.preview_url)
    }
}

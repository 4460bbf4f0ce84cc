use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use cloudvault_core::{
    CloudVaultError, RegisteredFile, RemoteFile, RemoteFolder, RemoteId, RemoteStore, StatusCode,
    UploadDestination,
};
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListFolders(Option<RemoteId>),
    ListFiles(Option<RemoteId>),
    CreateFolder {
        name: String,
        parent: Option<RemoteId>,
    },
    RequestUpload {
        name: String,
        folder: Option<RemoteId>,
    },
    PutBytes(String),
    Register(String),
    Download(RemoteId),
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Call::CreateFolder { .. } | Call::RequestUpload { .. } | Call::PutBytes(_) | Call::Register(_)
        )
    }
}

struct StoredFile {
    meta: RemoteFile,
    bytes: Vec<u8>,
}

struct Inner {
    next_id: i64,
    now: String,
    folders: Vec<RemoteFolder>,
    files: Vec<StoredFile>,
    staged: HashMap<String, (Option<RemoteId>, Vec<u8>)>,
    calls: Vec<Call>,
    failing_downloads: HashSet<RemoteId>,
    fail_folder_listing: bool,
    no_destination: bool,
}

/// In-memory stand-in for the CloudVault API that records every call.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    gate: watch::Sender<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                now: "2030-01-01T00:00:00Z".to_string(),
                folders: Vec::new(),
                files: Vec::new(),
                staged: HashMap::new(),
                calls: Vec::new(),
                failing_downloads: HashSet::new(),
                fail_folder_listing: false,
                no_destination: false,
            }),
            gate: watch::Sender::new(true),
        }
    }
}

impl MemoryStore {
    pub fn add_folder(&self, name: &str, parent: Option<i64>) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.folders.push(RemoteFolder {
            id: RemoteId::from(id),
            name: name.to_string(),
            parent_id: parent.map(RemoteId::from),
        });
        id
    }

    pub fn add_file(&self, folder: Option<i64>, name: &str, bytes: &[u8], updated_at: &str) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.files.push(StoredFile {
            meta: RemoteFile {
                id: RemoteId::from(id),
                name: name.to_string(),
                size: Some(bytes.len() as u64),
                mime_type: None,
                updated_at: Some(updated_at.to_string()),
                folder_id: folder.map(RemoteId::from),
            },
            bytes: bytes.to_vec(),
        });
        id
    }

    /// Timestamp given to files registered after an upload.
    pub fn set_now(&self, now: &str) {
        self.inner.lock().unwrap().now = now.to_string();
    }

    pub fn fail_download(&self, id: i64) {
        self.inner
            .lock()
            .unwrap()
            .failing_downloads
            .insert(RemoteId::from(id));
    }

    pub fn set_fail_folder_listing(&self, fail: bool) {
        self.inner.lock().unwrap().fail_folder_listing = fail;
    }

    pub fn set_no_destination(&self, none: bool) {
        self.inner.lock().unwrap().no_destination = none;
    }

    /// While closed, folder listings wait until the gate opens again.
    pub fn set_gate_open(&self, open: bool) {
        self.gate.send_replace(open);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn root_listings(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == Call::ListFolders(None))
            .count()
    }

    pub fn folder_named(&self, name: &str) -> Option<RemoteFolder> {
        let inner = self.inner.lock().unwrap();
        inner.folders.iter().find(|f| f.name == name).cloned()
    }

    /// Contents of every stored file called `name` in `folder`.
    pub fn file_bytes(&self, folder: Option<&RemoteId>, name: &str) -> Vec<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .iter()
            .filter(|f| f.meta.name == name && f.meta.folder_id.as_ref() == folder)
            .map(|f| f.bytes.clone())
            .collect()
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

fn server_error(body: &str) -> CloudVaultError {
    CloudVaultError::Api {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: body.to_string(),
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list_folders(
        &self,
        parent_id: Option<&RemoteId>,
    ) -> Result<Vec<RemoteFolder>, CloudVaultError> {
        self.record(Call::ListFolders(parent_id.cloned()));
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let inner = self.inner.lock().unwrap();
        if inner.fail_folder_listing {
            return Err(server_error("folder listing unavailable"));
        }
        Ok(inner
            .folders
            .iter()
            .filter(|f| f.parent_id.as_ref() == parent_id)
            .cloned()
            .collect())
    }

    async fn list_files(
        &self,
        folder_id: Option<&RemoteId>,
    ) -> Result<Vec<RemoteFile>, CloudVaultError> {
        self.record(Call::ListFiles(folder_id.cloned()));
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .files
            .iter()
            .filter(|f| f.meta.folder_id.as_ref() == folder_id)
            .map(|f| f.meta.clone())
            .collect())
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&RemoteId>,
    ) -> Result<RemoteId, CloudVaultError> {
        self.record(Call::CreateFolder {
            name: name.to_string(),
            parent: parent_id.cloned(),
        });
        let mut inner = self.inner.lock().unwrap();
        let id = RemoteId::from(inner.next_id);
        inner.next_id += 1;
        inner.folders.push(RemoteFolder {
            id: id.clone(),
            name: name.to_string(),
            parent_id: parent_id.cloned(),
        });
        Ok(id)
    }

    async fn request_upload_destination(
        &self,
        file_name: &str,
        _mime_type: &str,
        folder_id: Option<&RemoteId>,
    ) -> Result<Option<UploadDestination>, CloudVaultError> {
        self.record(Call::RequestUpload {
            name: file_name.to_string(),
            folder: folder_id.cloned(),
        });
        let mut inner = self.inner.lock().unwrap();
        if inner.no_destination {
            return Ok(None);
        }
        let slot = inner.next_id;
        inner.next_id += 1;
        let storage_path = format!("store/{slot}");
        inner
            .staged
            .insert(storage_path.clone(), (folder_id.cloned(), Vec::new()));
        Ok(Some(UploadDestination {
            upload_url: format!("mem://upload/{slot}"),
            storage_path,
        }))
    }

    async fn put_bytes(
        &self,
        upload_url: &str,
        bytes: Vec<u8>,
        _mime_type: &str,
    ) -> Result<(), CloudVaultError> {
        self.record(Call::PutBytes(upload_url.to_string()));
        let storage_path = format!("store/{}", upload_url.trim_start_matches("mem://upload/"));
        let mut inner = self.inner.lock().unwrap();
        match inner.staged.get_mut(&storage_path) {
            Some(staged) => {
                staged.1 = bytes;
                Ok(())
            }
            None => Err(server_error("unknown upload url")),
        }
    }

    async fn register_uploaded_file(
        &self,
        storage_path: &str,
        name: &str,
        _mime_type: &str,
        size: u64,
    ) -> Result<RegisteredFile, CloudVaultError> {
        self.record(Call::Register(name.to_string()));
        let mut inner = self.inner.lock().unwrap();
        let Some((folder_id, bytes)) = inner.staged.remove(storage_path) else {
            return Err(server_error("unknown storage path"));
        };
        let id = RemoteId::from(inner.next_id);
        inner.next_id += 1;
        let updated_at = inner.now.clone();
        // Re-uploading replaces the previous file of that name.
        inner
            .files
            .retain(|f| !(f.meta.name == name && f.meta.folder_id == folder_id));
        inner.files.push(StoredFile {
            meta: RemoteFile {
                id: id.clone(),
                name: name.to_string(),
                size: Some(size),
                mime_type: None,
                updated_at: Some(updated_at.clone()),
                folder_id,
            },
            bytes,
        });
        Ok(RegisteredFile {
            id: Some(id),
            updated_at: Some(updated_at),
        })
    }

    async fn download_file_bytes(&self, file_id: &RemoteId) -> Result<Vec<u8>, CloudVaultError> {
        self.record(Call::Download(file_id.clone()));
        let inner = self.inner.lock().unwrap();
        if inner.failing_downloads.contains(file_id) {
            return Err(server_error("download failed"));
        }
        inner
            .files
            .iter()
            .find(|f| &f.meta.id == file_id)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| server_error("no such file"))
    }
}

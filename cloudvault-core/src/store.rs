use async_trait::async_trait;

use crate::client::{CloudVaultClient, CloudVaultError};
use crate::model::{RegisteredFile, RemoteFile, RemoteFolder, RemoteId, UploadDestination};

/// The folder/file operations the sync engine needs from the cloud side.
///
/// `None` ids address the root of the store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn list_folders(
        &self,
        parent_id: Option<&RemoteId>,
    ) -> Result<Vec<RemoteFolder>, CloudVaultError>;

    async fn list_files(
        &self,
        folder_id: Option<&RemoteId>,
    ) -> Result<Vec<RemoteFile>, CloudVaultError>;

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&RemoteId>,
    ) -> Result<RemoteId, CloudVaultError>;

    async fn request_upload_destination(
        &self,
        file_name: &str,
        mime_type: &str,
        folder_id: Option<&RemoteId>,
    ) -> Result<Option<UploadDestination>, CloudVaultError>;

    async fn put_bytes(
        &self,
        upload_url: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<(), CloudVaultError>;

    async fn register_uploaded_file(
        &self,
        storage_path: &str,
        name: &str,
        mime_type: &str,
        size: u64,
    ) -> Result<RegisteredFile, CloudVaultError>;

    async fn download_file_bytes(&self, file_id: &RemoteId) -> Result<Vec<u8>, CloudVaultError>;
}

#[async_trait]
impl RemoteStore for CloudVaultClient {
    async fn list_folders(
        &self,
        parent_id: Option<&RemoteId>,
    ) -> Result<Vec<RemoteFolder>, CloudVaultError> {
        CloudVaultClient::list_folders(self, parent_id).await
    }

    async fn list_files(
        &self,
        folder_id: Option<&RemoteId>,
    ) -> Result<Vec<RemoteFile>, CloudVaultError> {
        CloudVaultClient::list_files(self, folder_id).await
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&RemoteId>,
    ) -> Result<RemoteId, CloudVaultError> {
        CloudVaultClient::create_folder(self, name, parent_id).await
    }

    async fn request_upload_destination(
        &self,
        file_name: &str,
        mime_type: &str,
        folder_id: Option<&RemoteId>,
    ) -> Result<Option<UploadDestination>, CloudVaultError> {
        CloudVaultClient::request_upload_destination(self, file_name, mime_type, folder_id).await
    }

    async fn put_bytes(
        &self,
        upload_url: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<(), CloudVaultError> {
        CloudVaultClient::put_bytes(self, upload_url, bytes, mime_type).await
    }

    async fn register_uploaded_file(
        &self,
        storage_path: &str,
        name: &str,
        mime_type: &str,
        size: u64,
    ) -> Result<RegisteredFile, CloudVaultError> {
        CloudVaultClient::register_uploaded_file(self, storage_path, name, mime_type, size).await
    }

    async fn download_file_bytes(&self, file_id: &RemoteId) -> Result<Vec<u8>, CloudVaultError> {
        CloudVaultClient::download_file_bytes(self, file_id).await
    }
}

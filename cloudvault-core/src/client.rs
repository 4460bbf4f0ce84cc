use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::model::{
    CreatedRecord, IndirectDownload, ListEnvelope, RawUploadDestination, RegisteredFile,
    RemoteFile, RemoteFolder, RemoteId, SingleEnvelope, UploadDestination,
};

#[derive(Debug, Error)]
pub enum CloudVaultError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("folder creation returned no id")]
    MissingFolderId,
    #[error("upload target returned {0}")]
    UploadRejected(StatusCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct CloudVaultClient {
    http: Client,
    base_url: Url,
    token: String,
}

#[derive(Serialize)]
struct CreateFolderBody<'a> {
    name: &'a str,
    parent_id: Option<&'a RemoteId>,
}

#[derive(Serialize)]
struct UploadUrlBody<'a> {
    file_name: &'a str,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_id: Option<&'a RemoteId>,
}

#[derive(Serialize)]
struct RegisterFileBody<'a> {
    storage_path: &'a str,
    name: &'a str,
    mime_type: &'a str,
    size: u64,
}

impl CloudVaultClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, CloudVaultError> {
        Self::with_http(Client::new(), base_url, token)
    }

    pub fn with_http(
        http: Client,
        base_url: &str,
        token: impl Into<String>,
    ) -> Result<Self, CloudVaultError> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn list_folders(
        &self,
        parent_id: Option<&RemoteId>,
    ) -> Result<Vec<RemoteFolder>, CloudVaultError> {
        let mut url = self.endpoint("/folders")?;
        if let Some(parent_id) = parent_id {
            url.query_pairs_mut()
                .append_pair("parent_id", &parent_id.to_string());
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let payload: ListEnvelope<RemoteFolder> = Self::handle_response(response).await?;
        Ok(payload.into_items())
    }

    pub async fn list_files(
        &self,
        folder_id: Option<&RemoteId>,
    ) -> Result<Vec<RemoteFile>, CloudVaultError> {
        let mut url = self.endpoint("/files")?;
        if let Some(folder_id) = folder_id {
            url.query_pairs_mut()
                .append_pair("folder_id", &folder_id.to_string());
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        let payload: ListEnvelope<RemoteFile> = Self::handle_response(response).await?;
        Ok(payload.into_items())
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&RemoteId>,
    ) -> Result<RemoteId, CloudVaultError> {
        let url = self.endpoint("/folders")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&CreateFolderBody { name, parent_id })
            .send()
            .await?;
        let payload: SingleEnvelope<CreatedRecord> = Self::handle_response(response).await?;
        payload
            .into_inner()
            .id
            .ok_or(CloudVaultError::MissingFolderId)
    }

    pub async fn request_upload_destination(
        &self,
        file_name: &str,
        mime_type: &str,
        folder_id: Option<&RemoteId>,
    ) -> Result<Option<UploadDestination>, CloudVaultError> {
        let url = self.endpoint("/files/upload-url")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&UploadUrlBody {
                file_name,
                mime_type,
                folder_id,
            })
            .send()
            .await?;
        let payload: RawUploadDestination = Self::handle_response(response).await?;
        Ok(match (payload.upload_url, payload.storage_path) {
            (Some(upload_url), Some(storage_path))
                if !upload_url.is_empty() && !storage_path.is_empty() =>
            {
                Some(UploadDestination {
                    upload_url,
                    storage_path,
                })
            }
            _ => None,
        })
    }

    /// Uploads to a pre-signed destination; the credential is not sent there.
    pub async fn put_bytes(
        &self,
        upload_url: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<(), CloudVaultError> {
        let url = Url::parse(upload_url)?;
        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CloudVaultError::UploadRejected(response.status()));
        }
        Ok(())
    }

    pub async fn register_uploaded_file(
        &self,
        storage_path: &str,
        name: &str,
        mime_type: &str,
        size: u64,
    ) -> Result<RegisteredFile, CloudVaultError> {
        let url = self.endpoint("/files")?;
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&RegisterFileBody {
                storage_path,
                name,
                mime_type,
                size,
            })
            .send()
            .await?;
        let payload: SingleEnvelope<RegisteredFile> = Self::handle_response(response).await?;
        Ok(payload.into_inner())
    }

    /// Returns the file contents. The server may answer with the raw bytes or
    /// with a JSON document pointing at a signed URL, which is then fetched
    /// without credentials.
    pub async fn download_file_bytes(&self, file_id: &RemoteId) -> Result<Vec<u8>, CloudVaultError> {
        let url = self.endpoint(&format!("/files/{file_id}/download"))?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false);
        let body = response.bytes().await?;
        if is_json {
            let indirect: IndirectDownload = serde_json::from_slice(&body)?;
            if let Some(signed) = indirect.into_url() {
                return self.fetch_signed(&signed).await;
            }
        }
        Ok(body.to_vec())
    }

    async fn fetch_signed(&self, signed: &str) -> Result<Vec<u8>, CloudVaultError> {
        let url = Url::parse(signed)?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    // The base may carry a path prefix ("https://host/api"), so endpoints are
    // appended rather than resolved with `Url::join`.
    fn endpoint(&self, path: &str) -> Result<Url, CloudVaultError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CloudVaultError> {
        if response.status().is_success() {
            let body = response.bytes().await?;
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(serde_json::from_str("{}")?);
            }
            Ok(serde_json::from_slice(&body)?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> CloudVaultError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        CloudVaultError::Api { status, body }
    }
}

impl CloudVaultError {
    /// Class of an HTTP failure; `None` for transport and decoding errors.
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            CloudVaultError::Api { status, .. } | CloudVaultError::UploadRejected(status) => {
                Some(classify_api_status(*status))
            }
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let client = CloudVaultClient::new("http://localhost:3000/api/", "t").unwrap();
        assert_eq!(
            client.endpoint("/files/upload-url").unwrap().as_str(),
            "http://localhost:3000/api/files/upload-url"
        );
    }

    #[test]
    fn classifies_statuses() {
        let err = |status| CloudVaultError::Api {
            status,
            body: String::new(),
        };
        assert_eq!(
            err(StatusCode::UNAUTHORIZED).classification(),
            Some(ApiErrorClass::Auth)
        );
        assert_eq!(
            err(StatusCode::TOO_MANY_REQUESTS).classification(),
            Some(ApiErrorClass::RateLimit)
        );
        assert_eq!(
            err(StatusCode::BAD_GATEWAY).classification(),
            Some(ApiErrorClass::Transient)
        );
        assert_eq!(
            err(StatusCode::NOT_FOUND).classification(),
            Some(ApiErrorClass::Permanent)
        );
        assert_eq!(
            CloudVaultError::UploadRejected(StatusCode::FORBIDDEN).classification(),
            Some(ApiErrorClass::Auth)
        );
        assert_eq!(CloudVaultError::MissingFolderId.classification(), None);
    }
}

mod client;
mod model;
mod store;

pub use client::{ApiErrorClass, CloudVaultClient, CloudVaultError};
pub use model::{RegisteredFile, RemoteFile, RemoteFolder, RemoteId, UploadDestination};
pub use store::RemoteStore;

pub use reqwest::StatusCode;

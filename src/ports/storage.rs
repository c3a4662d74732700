use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMeta {
    pub key: String,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn download(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn upload(&self, data: Bytes, meta: UploadMeta) -> Result<StoredObject, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

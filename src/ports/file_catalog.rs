use crate::scheduler::FileId;

/// What the engine needs to know about an accepted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub filename: String,
    pub content_type: String,
    pub storage_key: String,
    pub size_bytes: u64,
}

#[async_trait::async_trait]
pub trait FileCatalog: Send + Sync {
    async fn get_file(&self, id: FileId) -> Result<Option<FileRecord>, CatalogError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
}

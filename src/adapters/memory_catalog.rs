use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::ports::{CatalogError, FileCatalog, FileRecord};
use crate::scheduler::FileId;

/// File catalog held in memory. Used by the CLI and by tests.
#[derive(Debug, Default)]
pub struct InMemoryFileCatalog {
    files: RwLock<HashMap<FileId, FileRecord>>,
}

impl InMemoryFileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub async fn register(&self, record: FileRecord) {
        self.files.write().await.insert(record.id, record);
    }

    pub async fn remove(&self, id: FileId) -> Option<FileRecord> {
        self.files.write().await.remove(&id)
    }
}

#[async_trait::async_trait]
impl FileCatalog for InMemoryFileCatalog {
    async fn get_file(&self, id: FileId) -> Result<Option<FileRecord>, CatalogError> {
        Ok(self.files.read().await.get(&id).cloned())
    }
}

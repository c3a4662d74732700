use std::path::{Component, Path, PathBuf};

use bytes::Bytes;

use crate::ports::{Storage, StorageError, StoredObject, UploadMeta};

/// Object storage on the local filesystem. Keys are relative paths under `root`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::NotFound(format!("invalid key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl Storage for LocalStorage {
    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::DownloadFailed(format!("{}: {}", key, e))),
        }
    }

    async fn upload(&self, data: Bytes, meta: UploadMeta) -> Result<StoredObject, StorageError> {
        let path = self
            .resolve(&meta.key)
            .map_err(|_| StorageError::UploadFailed(format!("invalid key: {}", meta.key)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;

        tracing::debug!(
            key = %meta.key,
            content_type = %meta.content_type,
            bytes = data.len(),
            "Stored object"
        );

        Ok(StoredObject {
            url: format!("file://{}", path.display()),
            key: meta.key,
        })
    }
}

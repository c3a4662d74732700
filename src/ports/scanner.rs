use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanVerdict {
    pub is_clean: bool,
    pub threat: Option<String>,
}

impl ScanVerdict {
    pub fn clean() -> Self {
        Self {
            is_clean: true,
            threat: None,
        }
    }

    pub fn infected(threat: impl Into<String>) -> Self {
        Self {
            is_clean: false,
            threat: Some(threat.into()),
        }
    }
}

#[async_trait::async_trait]
pub trait MalwareScanner: Send + Sync {
    async fn scan(&self, data: &[u8]) -> Result<ScanVerdict, ScanError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scanner unavailable: {0}")]
    Unavailable(String),
    #[error("scan failed: {0}")]
    Failed(String),
}

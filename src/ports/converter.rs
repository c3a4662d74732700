use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionResult {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

#[async_trait::async_trait]
pub trait DocumentConverter: Send + Sync {
    /// `options` is the job's metadata bag, passed through untouched.
    async fn convert(
        &self,
        data: &[u8],
        content_type: &str,
        options: &crate::scheduler::JobMetadata,
    ) -> Result<ConversionResult, ConvertError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("unsupported content type: {0}")]
    Unsupported(String),
    #[error("conversion failed: {0}")]
    Failed(String),
}

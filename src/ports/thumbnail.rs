use bytes::Bytes;

use crate::config::ThumbnailSize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub content_type: String,
    pub data: Bytes,
}

#[async_trait::async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    async fn generate(
        &self,
        data: &[u8],
        content_type: &str,
        sizes: &[ThumbnailSize],
    ) -> Result<Vec<Thumbnail>, RenderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("unsupported content type: {0}")]
    Unsupported(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

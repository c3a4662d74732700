use std::io::Cursor;

use bytes::Bytes;
use image::ImageFormat;

use crate::config::ThumbnailSize;
use crate::ports::{RenderError, Thumbnail, ThumbnailGenerator};

/// Raster thumbnails via the `image` crate. Output is always PNG and keeps
/// the source aspect ratio inside each requested bounding box.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageThumbnailer;

impl ImageThumbnailer {
    pub fn new() -> Self {
        Self
    }
}

fn render(data: &[u8], sizes: &[ThumbnailSize]) -> Result<Vec<Thumbnail>, RenderError> {
    let source = image::load_from_memory(data).map_err(|e| RenderError::Decode(e.to_string()))?;

    sizes
        .iter()
        .map(|size| {
            let scaled = source.thumbnail(size.width, size.height);
            let mut buf = Cursor::new(Vec::new());
            scaled
                .write_to(&mut buf, ImageFormat::Png)
                .map_err(|e| RenderError::Encode(e.to_string()))?;
            Ok(Thumbnail {
                width: scaled.width(),
                height: scaled.height(),
                content_type: "image/png".to_string(),
                data: Bytes::from(buf.into_inner()),
            })
        })
        .collect()
}

#[async_trait::async_trait]
impl ThumbnailGenerator for ImageThumbnailer {
    async fn generate(
        &self,
        data: &[u8],
        content_type: &str,
        sizes: &[ThumbnailSize],
    ) -> Result<Vec<Thumbnail>, RenderError> {
        if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(RenderError::Unsupported(content_type.to_string()));
        }

        let data = data.to_vec();
        let sizes = sizes.to_vec();
        tokio::task::spawn_blocking(move || render(&data, &sizes))
            .await
            .map_err(|e| RenderError::Encode(format!("render task failed: {}", e)))?
    }
}

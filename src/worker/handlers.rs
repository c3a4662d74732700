//! Stage handlers. Each one downloads the file, calls its collaborator and
//! uploads any derived artifacts; the heavy lifting lives behind the ports.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;

use crate::config::ThumbnailSize;
use crate::ports::{
    ConversionResult, DocumentConverter, MalwareScanner, Storage, ThumbnailGenerator, UploadMeta,
};
use crate::scheduler::StageType;
use crate::worker::progress::JobContext;
use crate::worker::registry::{HandlerError, HandlerRegistry, JobHandler};

type HandlerResult = Result<Option<serde_json::Value>, HandlerError>;

/// Collaborators the standard handlers call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn Storage>,
    pub scanner: Arc<dyn MalwareScanner>,
    pub thumbnails: Arc<dyn ThumbnailGenerator>,
    pub converter: Arc<dyn DocumentConverter>,
}

/// Registry with a handler for every stage type.
pub fn standard_registry(
    collaborators: &Collaborators,
    thumbnail_sizes: Vec<ThumbnailSize>,
) -> HandlerRegistry {
    let storage = &collaborators.storage;
    let converter = &collaborators.converter;

    HandlerRegistry::new()
        .with_handler(
            StageType::MalwareScan,
            Arc::new(MalwareScanHandler::new(
                Arc::clone(storage),
                Arc::clone(&collaborators.scanner),
            )),
        )
        .with_handler(
            StageType::ThumbnailGeneration,
            Arc::new(ThumbnailHandler::new(
                Arc::clone(storage),
                Arc::clone(&collaborators.thumbnails),
                thumbnail_sizes,
            )),
        )
        .with_handler(
            StageType::DocumentConversion,
            Arc::new(DocumentConversionHandler::new(
                Arc::clone(storage),
                Arc::clone(converter),
            )),
        )
        .with_handler(
            StageType::MetadataExtraction,
            Arc::new(MetadataExtractionHandler::new(
                Arc::clone(storage),
                Arc::clone(converter),
            )),
        )
        .with_handler(
            StageType::TextExtraction,
            Arc::new(TextExtractionHandler::new(
                Arc::clone(storage),
                Arc::clone(converter),
            )),
        )
}

async fn download(ctx: &JobContext, storage: &dyn Storage) -> Result<Bytes, HandlerError> {
    ctx.checkpoint()?;
    let data = storage.download(&ctx.file().storage_key).await?;
    tracing::debug!(bytes = data.len(), key = %ctx.file().storage_key, "Downloaded file");
    Ok(data)
}

pub struct MalwareScanHandler {
    storage: Arc<dyn Storage>,
    scanner: Arc<dyn MalwareScanner>,
}

impl MalwareScanHandler {
    pub fn new(storage: Arc<dyn Storage>, scanner: Arc<dyn MalwareScanner>) -> Self {
        Self { storage, scanner }
    }
}

#[async_trait::async_trait]
impl JobHandler for MalwareScanHandler {
    async fn handle(&self, ctx: &JobContext) -> HandlerResult {
        let data = download(ctx, self.storage.as_ref()).await?;
        ctx.report_progress(30).await?;

        let verdict = self.scanner.scan(&data).await?;
        ctx.report_progress(90).await?;

        if let Some(threat) = &verdict.threat {
            tracing::warn!(file_id = %ctx.file().id, threat = %threat, "Malware detected");
        }

        Ok(Some(json!({
            "is_clean": verdict.is_clean,
            "threat": verdict.threat,
        })))
    }
}

pub struct ThumbnailHandler {
    storage: Arc<dyn Storage>,
    generator: Arc<dyn ThumbnailGenerator>,
    sizes: Vec<ThumbnailSize>,
}

impl ThumbnailHandler {
    pub fn new(
        storage: Arc<dyn Storage>,
        generator: Arc<dyn ThumbnailGenerator>,
        sizes: Vec<ThumbnailSize>,
    ) -> Self {
        Self {
            storage,
            generator,
            sizes,
        }
    }

    /// Jobs may override the configured sizes with `"sizes": ["64x64", ...]`.
    fn sizes_for(&self, ctx: &JobContext) -> Result<Vec<ThumbnailSize>, HandlerError> {
        let Some(value) = ctx.metadata().get("sizes") else {
            return Ok(self.sizes.clone());
        };
        let entries = value
            .as_array()
            .ok_or_else(|| HandlerError::InvalidOptions("sizes must be an array".to_string()))?;
        entries
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .ok_or_else(|| {
                        HandlerError::InvalidOptions("sizes entries must be strings".to_string())
                    })?
                    .parse::<ThumbnailSize>()
                    .map_err(HandlerError::InvalidOptions)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl JobHandler for ThumbnailHandler {
    async fn handle(&self, ctx: &JobContext) -> HandlerResult {
        let sizes = self.sizes_for(ctx)?;
        let data = download(ctx, self.storage.as_ref()).await?;
        ctx.report_progress(20).await?;

        let thumbnails = self
            .generator
            .generate(&data, &ctx.file().content_type, &sizes)
            .await?;
        ctx.report_progress(60).await?;

        let total = thumbnails.len().max(1);
        let mut uploaded = Vec::with_capacity(thumbnails.len());
        for (index, thumbnail) in thumbnails.into_iter().enumerate() {
            let extension = thumbnail
                .content_type
                .rsplit('/')
                .next()
                .unwrap_or("bin")
                .to_string();
            // Index keeps two sizes that scale to the same dimensions apart.
            let key = format!(
                "thumbnails/{}/{}/{}-{}x{}.{}",
                ctx.file().id,
                ctx.job_id(),
                index,
                thumbnail.width,
                thumbnail.height,
                extension
            );
            let stored = self
                .storage
                .upload(
                    thumbnail.data,
                    UploadMeta {
                        key,
                        content_type: thumbnail.content_type,
                    },
                )
                .await?;
            uploaded.push(json!({
                "width": thumbnail.width,
                "height": thumbnail.height,
                "key": stored.key,
                "url": stored.url,
            }));
            ctx.report_progress(60 + (35 * (index + 1) / total) as i32)
                .await?;
        }

        Ok(Some(json!({ "thumbnails": uploaded })))
    }
}

async fn convert(
    ctx: &JobContext,
    storage: &dyn Storage,
    converter: &dyn DocumentConverter,
) -> Result<ConversionResult, HandlerError> {
    let data = download(ctx, storage).await?;
    ctx.report_progress(20).await?;

    let result = converter
        .convert(&data, &ctx.file().content_type, ctx.metadata())
        .await?;
    for warning in &result.warnings {
        tracing::debug!(warning = %warning, "Conversion warning");
    }
    ctx.report_progress(70).await?;
    Ok(result)
}

async fn upload_text(
    storage: &dyn Storage,
    key: String,
    text: String,
) -> Result<serde_json::Value, HandlerError> {
    let stored = storage
        .upload(
            Bytes::from(text),
            UploadMeta {
                key,
                content_type: "text/plain; charset=utf-8".to_string(),
            },
        )
        .await?;
    Ok(json!({ "key": stored.key, "url": stored.url }))
}

pub struct DocumentConversionHandler {
    storage: Arc<dyn Storage>,
    converter: Arc<dyn DocumentConverter>,
}

impl DocumentConversionHandler {
    pub fn new(storage: Arc<dyn Storage>, converter: Arc<dyn DocumentConverter>) -> Self {
        Self { storage, converter }
    }
}

#[async_trait::async_trait]
impl JobHandler for DocumentConversionHandler {
    async fn handle(&self, ctx: &JobContext) -> HandlerResult {
        let result = convert(ctx, self.storage.as_ref(), self.converter.as_ref()).await?;
        let key = format!("converted/{}/{}.txt", ctx.file().id, ctx.job_id());
        let artifact = upload_text(self.storage.as_ref(), key, result.text).await?;
        ctx.report_progress(95).await?;

        Ok(Some(json!({
            "artifact": artifact,
            "warnings": result.warnings,
        })))
    }
}

pub struct MetadataExtractionHandler {
    storage: Arc<dyn Storage>,
    converter: Arc<dyn DocumentConverter>,
}

impl MetadataExtractionHandler {
    pub fn new(storage: Arc<dyn Storage>, converter: Arc<dyn DocumentConverter>) -> Self {
        Self { storage, converter }
    }
}

#[async_trait::async_trait]
impl JobHandler for MetadataExtractionHandler {
    async fn handle(&self, ctx: &JobContext) -> HandlerResult {
        let result = convert(ctx, self.storage.as_ref(), self.converter.as_ref()).await?;
        Ok(Some(json!({ "metadata": result.metadata })))
    }
}

pub struct TextExtractionHandler {
    storage: Arc<dyn Storage>,
    converter: Arc<dyn DocumentConverter>,
}

impl TextExtractionHandler {
    pub fn new(storage: Arc<dyn Storage>, converter: Arc<dyn DocumentConverter>) -> Self {
        Self { storage, converter }
    }
}

#[async_trait::async_trait]
impl JobHandler for TextExtractionHandler {
    async fn handle(&self, ctx: &JobContext) -> HandlerResult {
        let result = convert(ctx, self.storage.as_ref(), self.converter.as_ref()).await?;
        let characters = result.text.chars().count();
        let words = result.text.split_whitespace().count();
        let key = format!("text/{}/{}.txt", ctx.file().id, ctx.job_id());
        let artifact = upload_text(self.storage.as_ref(), key, result.text).await?;
        ctx.report_progress(95).await?;

        Ok(Some(json!({
            "artifact": artifact,
            "characters": characters,
            "words": words,
        })))
    }
}

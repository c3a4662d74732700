use std::collections::BTreeMap;

use crate::ports::{ConversionResult, ConvertError, DocumentConverter};
use crate::scheduler::JobMetadata;

/// Converter for `text/*` content. Other formats need an external converter.
///
/// Honors a `max_chars` option that truncates the extracted text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextConverter;

impl PlainTextConverter {
    pub fn new() -> Self {
        Self
    }
}

fn max_chars(options: &JobMetadata) -> Result<Option<usize>, ConvertError> {
    match options.get("max_chars") {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| ConvertError::Failed("max_chars must be a non-negative integer".into())),
    }
}

#[async_trait::async_trait]
impl DocumentConverter for PlainTextConverter {
    async fn convert(
        &self,
        data: &[u8],
        content_type: &str,
        options: &JobMetadata,
    ) -> Result<ConversionResult, ConvertError> {
        if !content_type.trim().to_ascii_lowercase().starts_with("text/") {
            return Err(ConvertError::Unsupported(content_type.to_string()));
        }

        let mut warnings = Vec::new();
        let mut text = match std::str::from_utf8(data) {
            Ok(s) => s.to_string(),
            Err(_) => {
                warnings.push("invalid UTF-8 replaced".to_string());
                String::from_utf8_lossy(data).into_owned()
            }
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("bytes".to_string(), data.len().to_string());
        metadata.insert("lines".to_string(), text.lines().count().to_string());
        metadata.insert(
            "words".to_string(),
            text.split_whitespace().count().to_string(),
        );
        metadata.insert("characters".to_string(), text.chars().count().to_string());

        if let Some(limit) = max_chars(options)? {
            if let Some((cut, _)) = text.char_indices().nth(limit) {
                text.truncate(cut);
                warnings.push(format!("truncated to {} characters", limit));
            }
        }

        Ok(ConversionResult {
            text,
            metadata,
            warnings,
        })
    }
}

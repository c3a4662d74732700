use std::collections::HashMap;
use std::sync::Arc;

use crate::ports::{ConvertError, RenderError, ScanError, StorageError};
use crate::scheduler::StageType;
use crate::worker::progress::JobContext;

/// Failure of a single stage execution. Recorded on the job, never propagated
/// to the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("malware scan: {0}")]
    Scan(#[from] ScanError),
    #[error("thumbnail rendering: {0}")]
    Render(#[from] RenderError),
    #[error("conversion: {0}")]
    Convert(#[from] ConvertError),
    #[error("invalid job options: {0}")]
    InvalidOptions(String),
    #[error("{0}")]
    Failed(String),
    /// The handler observed the cancellation token and stopped early.
    #[error("cancelled")]
    Cancelled,
}

/// Uniform contract for stage handlers.
///
/// Handlers should call [`JobContext::report_progress`] between units of work;
/// it doubles as the cancellation checkpoint.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    /// Returns an optional JSON summary stored on the completed job.
    async fn handle(&self, ctx: &JobContext) -> Result<Option<serde_json::Value>, HandlerError>;
}

/// One handler per stage type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<StageType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the stage.
    pub fn register(&mut self, stage: StageType, handler: Arc<dyn JobHandler>) {
        if self.handlers.insert(stage, handler).is_some() {
            tracing::debug!(stage = %stage, "Replaced stage handler");
        }
    }

    pub fn with_handler(mut self, stage: StageType, handler: Arc<dyn JobHandler>) -> Self {
        self.register(stage, handler);
        self
    }

    pub fn get(&self, stage: StageType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&stage).cloned()
    }

    pub fn supports(&self, stage: StageType) -> bool {
        self.handlers.contains_key(&stage)
    }

    /// Registered stages in canonical order.
    pub fn stages(&self) -> Vec<StageType> {
        StageType::ALL
            .into_iter()
            .filter(|stage| self.handlers.contains_key(stage))
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("stages", &self.stages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait::async_trait]
    impl JobHandler for Noop {
        async fn handle(
            &self,
            _ctx: &JobContext,
        ) -> Result<Option<serde_json::Value>, HandlerError> {
            Ok(None)
        }
    }

    #[test]
    fn registry_lookup() {
        let registry = HandlerRegistry::new()
            .with_handler(StageType::TextExtraction, Arc::new(Noop))
            .with_handler(StageType::MalwareScan, Arc::new(Noop));

        assert!(registry.supports(StageType::MalwareScan));
        assert!(!registry.supports(StageType::ThumbnailGeneration));
        assert!(registry.get(StageType::TextExtraction).is_some());
        assert!(registry.get(StageType::DocumentConversion).is_none());
        assert_eq!(
            registry.stages(),
            vec![StageType::MalwareScan, StageType::TextExtraction]
        );
    }

    #[test]
    fn cancelled_is_distinct_from_failure() {
        assert_eq!(HandlerError::Cancelled.to_string(), "cancelled");
        assert_eq!(
            HandlerError::Failed("boom".to_string()).to_string(),
            "boom"
        );
    }
}

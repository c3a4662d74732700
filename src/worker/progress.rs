use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::ports::{FileRecord, JobRepository};
use crate::scheduler::{Job, JobId, JobMetadata, JobUpdate};
use crate::worker::registry::HandlerError;

/// Narrow progress API handed to stage handlers.
///
/// Values are clamped to 0..=100 and only increases are persisted.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    repository: Arc<dyn JobRepository>,
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, repository: Arc<dyn JobRepository>) -> Self {
        Self {
            job_id,
            repository,
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    pub async fn report(&self, value: i32) {
        let value = value.clamp(0, 100) as u8;
        let previous = self.last.fetch_max(value, Ordering::SeqCst);
        if value <= previous {
            return;
        }

        if let Err(e) = self
            .repository
            .update(self.job_id, JobUpdate::Progress(value))
            .await
        {
            tracing::error!(job_id = %self.job_id, progress = value, error = %e, "Failed to persist job progress");
        }
    }

    pub fn last_reported(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Everything a handler may touch while processing one job.
pub struct JobContext {
    job: Job,
    file: FileRecord,
    progress: ProgressReporter,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        job: Job,
        file: FileRecord,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job,
            file,
            progress,
            cancel,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn job_id(&self) -> JobId {
        self.job.id
    }

    pub fn file(&self) -> &FileRecord {
        &self.file
    }

    pub fn metadata(&self) -> &JobMetadata {
        &self.job.metadata
    }

    /// Persist progress, then check for cancellation.
    pub async fn report_progress(&self, value: i32) -> Result<(), HandlerError> {
        self.progress.report(value).await;
        self.checkpoint()
    }

    /// Returns `Err(HandlerError::Cancelled)` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), HandlerError> {
        if self.cancel.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// For handlers that want to `select!` on cancellation inside a long call.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

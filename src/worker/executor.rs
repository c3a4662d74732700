use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::ports::{FileCatalog, JobRepository};
use crate::scheduler::{Job, JobId, JobStatus, JobUpdate};
use crate::worker::progress::{JobContext, ProgressReporter};
use crate::worker::registry::{HandlerError, HandlerRegistry};

/// Result of job execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub error: Option<String>,
}

/// Wraps every stage handler invocation.
///
/// - checks cancellation before the handler starts
/// - maps the handler result onto a terminal status and persists it
/// - isolates errors and panics to the job that raised them
#[derive(Clone)]
pub struct JobExecutor {
    registry: Arc<HandlerRegistry>,
    repository: Arc<dyn JobRepository>,
    catalog: Arc<dyn FileCatalog>,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        repository: Arc<dyn JobRepository>,
        catalog: Arc<dyn FileCatalog>,
    ) -> Self {
        Self {
            registry,
            repository,
            catalog,
        }
    }

    /// Run the handler for a job that is already in Processing.
    pub async fn execute(&self, job: Job, cancel: CancellationToken) -> ExecutionResult {
        let job_id = job.id;
        tracing::info!(job_id = %job_id, stage = %job.stage, "Executing job");

        let outcome = self.run_handler(job, cancel).await;
        let at = Utc::now();

        let (update, status, error) = match outcome {
            Ok(output) => (JobUpdate::Completed { at, output }, JobStatus::Completed, None),
            Err(HandlerError::Cancelled) => {
                (JobUpdate::Cancelled { at }, JobStatus::Cancelled, None)
            }
            Err(e) => {
                let message = e.to_string();
                (
                    JobUpdate::Failed {
                        at,
                        message: message.clone(),
                    },
                    JobStatus::Failed,
                    Some(message),
                )
            }
        };

        match status {
            JobStatus::Failed => tracing::warn!(
                job_id = %job_id,
                error = error.as_deref().unwrap_or_default(),
                "Job failed"
            ),
            _ => tracing::info!(job_id = %job_id, status = %status, "Job finished"),
        }

        if let Err(e) = self.repository.update(job_id, update).await {
            tracing::error!(
                job_id = %job_id,
                status = %status,
                error = %e,
                "Failed to persist final job status"
            );
        }

        ExecutionResult {
            job_id,
            status,
            error,
        }
    }

    async fn run_handler(
        &self,
        job: Job,
        cancel: CancellationToken,
    ) -> Result<Option<serde_json::Value>, HandlerError> {
        if cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }

        let handler = self.registry.get(job.stage).ok_or_else(|| {
            HandlerError::Failed(format!("no handler registered for stage {}", job.stage))
        })?;

        let file = self
            .catalog
            .get_file(job.file_id)
            .await
            .map_err(|e| HandlerError::Failed(format!("file lookup failed: {}", e)))?
            .ok_or_else(|| HandlerError::Failed(format!("file {} not found", job.file_id)))?;

        let progress = ProgressReporter::new(job.id, Arc::clone(&self.repository));
        let ctx = JobContext::new(job, file, progress, cancel);

        match AssertUnwindSafe(handler.handle(&ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Failed(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

use chrono::{DateTime, Utc};

use crate::scheduler::{FileId, Job, JobId, JobStatus, JobUpdate, TransitionError};

/// Durable job records, keyed by id with secondary lookup by file and status.
#[async_trait::async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: &Job) -> Result<(), RepositoryError>;

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, RepositoryError>;

    /// Jobs for a file, newest first.
    async fn list_by_file(&self, file_id: FileId) -> Result<Vec<Job>, RepositoryError>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, RepositoryError>;

    /// Apply a state change through [`Job::apply`] and return the updated record.
    async fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, RepositoryError>;

    /// Delete terminal jobs created at or before `cutoff`. Returns how many were removed.
    async fn delete_terminal_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

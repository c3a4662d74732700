use thiserror::Error;

use crate::ports::{CatalogError, RepositoryError};
use crate::scheduler::JobId;

#[derive(Error, Debug)]
pub enum DocflowError {
    /// Rejected synchronously at creation time (unknown file, unsupported stage).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// Job persistence failed.
    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] RepositoryError),

    #[error("File catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Dispatcher is not running")]
    DispatcherStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DocflowError>;

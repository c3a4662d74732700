//! Stage execution.
//!
//! - **Registry**: one [`JobHandler`] per [`StageType`](crate::scheduler::StageType)
//! - **Executor**: the framework wrapping every handler call; turns the
//!   handler's result into Completed, Failed or Cancelled
//! - **Progress**: [`JobContext`] and [`ProgressReporter`], the only channel
//!   from a running handler back to job state
//! - **Handlers**: the standard stage handlers and their collaborators
//!
//! # Execution Flow
//!
//! 1. The dispatcher marks a job Processing and spawns [`JobExecutor::execute`]
//! 2. The executor checks cancellation, resolves the handler and the file
//! 3. The handler reports progress; each report is a cancellation checkpoint
//! 4. The executor persists the terminal status and returns an [`ExecutionResult`]
//!
//! There is no retry and no deadline: a handler that never returns keeps its
//! concurrency slot.

pub mod executor;
pub mod handlers;
pub mod progress;
pub mod registry;

pub use executor::{ExecutionResult, JobExecutor};
pub use handlers::{standard_registry, Collaborators};
pub use progress::{JobContext, ProgressReporter};
pub use registry::{HandlerError, HandlerRegistry, JobHandler};

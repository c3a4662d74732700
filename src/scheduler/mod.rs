pub mod dispatcher;
pub mod job;
pub mod policy;
pub mod queue;
pub mod sweeper;

pub use dispatcher::{CancelOutcome, Dispatcher, EngineDeps, QueueStatus, Scheduler};
pub use job::{
    FileId, Job, JobId, JobMetadata, JobSnapshot, JobStatus, JobUpdate, Priority, StageType,
    TransitionError,
};
pub use policy::{StageFlags, StagePolicy};
pub use queue::PendingQueue;
pub use sweeper::RetentionSweeper;

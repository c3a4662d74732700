//! Per-file job orchestration for a document platform.
//!
//! Accepting a file and post-processing it are decoupled: callers ask the
//! [`Scheduler`](scheduler::Scheduler) to process a file, one job is created per
//! required stage (malware scan, thumbnails, conversion, metadata and text
//! extraction), and a single dispatcher admits jobs by priority under a global
//! concurrency bound.

pub mod adapters;
pub mod config;
pub mod error;
pub mod ports;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use config::{EngineConfig, ThumbnailSize};
pub use error::{DocflowError, Result};

//! Collaborator contracts consumed by the engine.
//!
//! The engine only depends on these traits; concrete implementations live in
//! [`crate::adapters`] or outside the crate.

mod converter;
mod file_catalog;
mod job_repository;
mod scanner;
mod storage;
mod thumbnail;

pub use converter::{ConversionResult, ConvertError, DocumentConverter};
pub use file_catalog::{CatalogError, FileCatalog, FileRecord};
pub use job_repository::{JobRepository, RepositoryError};
pub use scanner::{MalwareScanner, ScanError, ScanVerdict};
pub use storage::{Storage, StorageError, StoredObject, UploadMeta};
pub use thumbnail::{RenderError, Thumbnail, ThumbnailGenerator};

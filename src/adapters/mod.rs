mod image_thumbnailer;
mod local_storage;
mod memory_catalog;
mod memory_repository;
mod signature_scanner;
mod text_converter;

pub use image_thumbnailer::ImageThumbnailer;
pub use local_storage::LocalStorage;
pub use memory_catalog::InMemoryFileCatalog;
pub use memory_repository::InMemoryJobRepository;
pub use signature_scanner::SignatureScanner;
pub use text_converter::PlainTextConverter;

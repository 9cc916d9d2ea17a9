pub mod consumption;
pub mod extraction_metadata;

pub use consumption::IndexedTable;
pub use extraction_metadata::ExtractionMetadata;

pub mod energi_api;

pub use energi_api::{export_window, EnergiDataSource, ExportWindow, Extraction, SourceError};

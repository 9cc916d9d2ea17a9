pub mod domain;
pub mod store;

pub use domain::{ExtractionMetadata, IndexedTable};
pub use store::{load_range, FeatureStore, FeatureStoreError, FeatureView};

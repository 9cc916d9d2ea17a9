pub mod feature_view_queries;

use arrow::{error::ArrowError, record_batch::RecordBatch};
use time::OffsetDateTime;

pub use feature_view_queries::{load_range, DEFAULT_TARGET, FEATURE_VIEW_NAME};

#[derive(thiserror::Error, Debug)]
pub enum FeatureStoreError {
    #[error("feature view '{name}' version {version} not found")]
    NotFound { name: String, version: u32 },
    #[error("column '{0}' not found in feature view data")]
    Key(String),
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("feature store authentication failed: {0}")]
    Auth(String),
    #[error("feature store backend error: {0}")]
    Backend(String),
}

/// Entry point of a feature store: resolves named, versioned feature views.
#[async_trait::async_trait]
pub trait FeatureStore: Send + Sync {
    async fn get_feature_view(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Box<dyn FeatureView>, FeatureStoreError>;
}

/// A resolved feature view that can be queried by time range.
#[async_trait::async_trait]
pub trait FeatureView: Send + Sync {
    /// Rows whose event time falls in `[start, end]`, in storage order.
    async fn get_batch_data(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<RecordBatch, FeatureStoreError>;
}

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use energy_client::FeatureStoreError;

use crate::cache::CacheError;
use crate::model::ModelError;
use crate::sinks::StorageError;
use crate::sources::SourceError;
use crate::transform::TransformError;

pub mod batch;
pub mod feature;

pub use batch::{BatchParams, BatchPredictionPipeline, BatchSummary};
pub use feature::{ExtractParams, FeaturePipeline, FeaturePipelineMetadata};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("transform error: {0}")]
    Transform(#[from] TransformError),
    #[error("sink error: {0}")]
    Sink(#[from] StorageError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("feature store error: {0}")]
    FeatureStore(#[from] FeatureStoreError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("table error: {0}")]
    Arrow(#[from] ArrowError),
    #[error("invalid pipeline metadata: {0}")]
    Metadata(String),
}

/// One table-to-table step of the feature pipeline.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, input: RecordBatch) -> Result<RecordBatch, TransformError>;
}

/// Run `input` through `transforms` in order.
pub fn apply_chain(
    transforms: &[std::sync::Arc<dyn Transform>],
    input: RecordBatch,
) -> Result<RecordBatch, TransformError> {
    transforms.iter().try_fold(input, |batch, t| {
        let out = t.apply(batch);
        if out.is_err() {
            metrics::counter!("transform_rejected_total", "transform" => t.name()).increment(1);
        }
        out
    })
}

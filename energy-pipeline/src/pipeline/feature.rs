use std::{path::PathBuf, sync::Arc};

use energy_client::{store::FEATURE_VIEW_NAME, ExtractionMetadata};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cache::{save_json, FEATURE_PIPELINE_METADATA};
use crate::observability::get_logger;
use crate::pipeline::{apply_chain, PipelineError, Transform};
use crate::sinks::BucketFeatureStore;
use crate::sources::EnergiDataSource;

/// What the feature pipeline leaves behind for the batch pipeline: the
/// extraction's metadata and the feature view version it was written to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePipelineMetadata {
    #[serde(flatten)]
    pub extraction: ExtractionMetadata,
    pub feature_group_version: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractParams {
    /// Defaults to now.
    pub reference_end: Option<OffsetDateTime>,
    pub days_delay: i64,
    pub days_export: i64,
}

/// Extract, transform and load one window of consumption data.
pub struct FeaturePipeline {
    pub source: EnergiDataSource,
    pub transforms: Vec<Arc<dyn Transform>>,
    pub store: BucketFeatureStore,
    pub output_dir: PathBuf,
    pub feature_group_version: u32,
}

impl FeaturePipeline {
    /// Returns `Ok(None)` when the API produced nothing usable; the cycle is
    /// skipped and no metadata is written.
    pub async fn run(&self, params: ExtractParams) -> Result<Option<FeaturePipelineMetadata>, PipelineError> {
        let logger = get_logger("feature_pipeline");

        logger.info("Extracting data from API.");
        let Some(extraction) = self
            .source
            .extract(params.reference_end, params.days_delay, params.days_export)
            .await?
        else {
            logger.warn("Could not extract data from API. Skipping cycle.");
            metrics::counter!("feature_pipeline_skipped_total").increment(1);
            return Ok(None);
        };
        if extraction.data.num_rows() == 0 {
            logger.warn("API returned no records. Skipping cycle.");
            metrics::counter!("feature_pipeline_skipped_total").increment(1);
            return Ok(None);
        }
        logger.info(format!("Extracted {} rows.", extraction.data.num_rows()));

        logger.info("Transforming data.");
        let rows = apply_chain(&self.transforms, extraction.data)?;

        logger.info(format!(
            "Loading data into feature view {FEATURE_VIEW_NAME} v{}.",
            self.feature_group_version
        ));
        self.store
            .insert(FEATURE_VIEW_NAME, self.feature_group_version, &rows)
            .await?;

        let metadata = FeaturePipelineMetadata {
            extraction: extraction.metadata,
            feature_group_version: self.feature_group_version,
        };
        save_json(&metadata, FEATURE_PIPELINE_METADATA, &self.output_dir)?;
        logger.info("Feature pipeline finished.");

        Ok(Some(metadata))
    }
}

use std::{path::PathBuf, sync::Arc};

use energy_client::domain::consumption::INDEX_COLUMNS;
use energy_client::store::{load_range, FeatureStore, DEFAULT_TARGET};
use time::OffsetDateTime;

use crate::cache::{load_json, FEATURE_PIPELINE_METADATA};
use crate::model::Forecaster;
use crate::observability::get_logger;
use crate::pipeline::{FeaturePipelineMetadata, PipelineError};
use crate::sinks::feature_store::upsert;
use crate::sinks::{read_table, write_table, Bucket};

pub const FEATURES_BLOB: &str = "X.parquet";
pub const TARGET_BLOB: &str = "y.parquet";
pub const PREDICTIONS_BLOB: &str = "predictions.parquet";
pub const MONITORING_BLOB: &str = "predictions_monitoring.parquet";

/// Overrides for one batch run. Anything left unset is taken from the
/// metadata cached by the last feature pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchParams {
    pub feature_view_version: Option<u32>,
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub feature_view_version: u32,
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
    pub observed_rows: usize,
    pub predicted_rows: usize,
    pub monitored_rows: usize,
}

pub struct BatchPredictionPipeline<M: Forecaster> {
    pub store: Arc<dyn FeatureStore>,
    pub bucket: Arc<dyn Bucket>,
    pub model: M,
    pub output_dir: PathBuf,
    /// Forecast horizon in hours.
    pub fh: usize,
}

impl<M: Forecaster> BatchPredictionPipeline<M> {
    fn resolve(&self, params: BatchParams) -> Result<(u32, OffsetDateTime, OffsetDateTime), PipelineError> {
        if let BatchParams {
            feature_view_version: Some(version),
            start: Some(start),
            end: Some(end),
        } = params
        {
            return Ok((version, start, end));
        }

        let cached: FeaturePipelineMetadata = load_json(FEATURE_PIPELINE_METADATA, &self.output_dir)?;
        let (cached_start, cached_end) = cached
            .extraction
            .export_window()
            .map_err(|e| PipelineError::Metadata(e.to_string()))?;

        Ok((
            params.feature_view_version.unwrap_or(cached.feature_group_version),
            params.start.unwrap_or(cached_start),
            params.end.unwrap_or(cached_end),
        ))
    }

    pub async fn run(&self, params: BatchParams) -> Result<BatchSummary, PipelineError> {
        let logger = get_logger("batch_prediction_pipeline");

        let (version, start, end) = self.resolve(params)?;
        if start > end {
            return Err(PipelineError::Metadata(format!("window start {start} is after end {end}")));
        }

        logger.info(format!("Loading data from feature store v{version} for [{start}, {end}]."));
        let (x, y) = load_range(self.store.as_ref(), version, start, end, DEFAULT_TARGET).await?;
        logger.info(format!("Loaded {} rows.", y.num_rows()));

        write_table(self.bucket.as_ref(), FEATURES_BLOB, &x.to_record_batch()?).await?;
        write_table(self.bucket.as_ref(), TARGET_BLOB, &y.to_record_batch()?).await?;

        logger.info(format!("Forecasting {} hours ahead.", self.fh));
        let predictions = self.model.forecast(&y, self.fh)?.to_record_batch()?;
        write_table(self.bucket.as_ref(), PREDICTIONS_BLOB, &predictions).await?;

        logger.info("Merging predictions into monitoring table.");
        let monitoring = match read_table(self.bucket.as_ref(), MONITORING_BLOB).await? {
            Some(existing) => upsert(&existing, &predictions, &INDEX_COLUMNS)?,
            None => predictions.clone(),
        };
        write_table(self.bucket.as_ref(), MONITORING_BLOB, &monitoring).await?;
        metrics::counter!("batch_predictions_total").increment(predictions.num_rows() as u64);
        logger.info("Batch prediction pipeline finished.");

        Ok(BatchSummary {
            feature_view_version: version,
            start,
            end,
            observed_rows: y.num_rows(),
            predicted_rows: predictions.num_rows(),
            monitored_rows: monitoring.num_rows(),
        })
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{ArrayRef, AsArray, Float64Array, Int32Array, Int8Array, StringArray, TimestampSecondArray};
    use arrow::datatypes::Float64Type;
    use arrow::record_batch::RecordBatch;
    use energy_client::store::FEATURE_VIEW_NAME;
    use energy_client::ExtractionMetadata;
    use time::macros::datetime;

    use super::*;
    use crate::cache::{save_json, CacheError};
    use crate::model::SeasonalNaiveForecaster;
    use crate::sinks::{BucketFeatureStore, InMemoryBucket};

    const T0: i64 = 1_701_388_800; // 2023-12-01T00:00:00Z

    fn rows(hours: &[i64], values: &[f64]) -> RecordBatch {
        let n = hours.len();
        RecordBatch::try_from_iter(vec![
            ("area", Arc::new(Int8Array::from(vec![1; n])) as ArrayRef),
            ("consumer_type", Arc::new(Int32Array::from(vec![111; n])) as ArrayRef),
            (
                "datetime_utc",
                Arc::new(
                    TimestampSecondArray::from(hours.iter().map(|h| T0 + h * 3_600).collect::<Vec<_>>())
                        .with_timezone("UTC"),
                ) as ArrayRef,
            ),
            ("houdk", Arc::new(StringArray::from(vec!["x"; n])) as ArrayRef),
            ("energy_consumption", Arc::new(Float64Array::from(values.to_vec())) as ArrayRef),
        ])
        .unwrap()
    }

    async fn fixture(dir: &std::path::Path) -> BatchPredictionPipeline<SeasonalNaiveForecaster> {
        let bucket: Arc<dyn Bucket> = Arc::new(InMemoryBucket::new("test"));
        let store = BucketFeatureStore::new(bucket.clone());
        store
            .insert(FEATURE_VIEW_NAME, 2, &rows(&[0, 1, 2, 3], &[1.0, 2.0, 3.0, 4.0]))
            .await
            .unwrap();

        BatchPredictionPipeline {
            store: Arc::new(store),
            bucket,
            model: SeasonalNaiveForecaster { season_length: 2 },
            output_dir: dir.to_path_buf(),
            fh: 3,
        }
    }

    fn consumption(batch: &RecordBatch) -> Vec<f64> {
        batch
            .column_by_name("energy_consumption")
            .unwrap()
            .as_primitive::<Float64Type>()
            .values()
            .to_vec()
    }

    #[tokio::test]
    async fn writes_inputs_and_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = fixture(dir.path()).await;

        let summary = pipeline
            .run(BatchParams {
                feature_view_version: Some(2),
                start: Some(datetime!(2023-12-01 00:00 UTC)),
                end: Some(datetime!(2023-12-01 03:00 UTC)),
            })
            .await
            .unwrap();

        assert_eq!(summary.observed_rows, 4);
        assert_eq!(summary.predicted_rows, 3);
        let bucket = pipeline.bucket.as_ref();
        let x = read_table(bucket, FEATURES_BLOB).await.unwrap().unwrap();
        assert!(x.column_by_name("houdk").is_none());
        assert!(x.column_by_name("energy_consumption").is_none());
        let y = read_table(bucket, TARGET_BLOB).await.unwrap().unwrap();
        assert_eq!(consumption(&y), vec![1.0, 2.0, 3.0, 4.0]);
        let predictions = read_table(bucket, PREDICTIONS_BLOB).await.unwrap().unwrap();
        assert_eq!(consumption(&predictions), vec![3.0, 4.0, 3.0]);
    }

    #[tokio::test]
    async fn window_and_version_come_from_cached_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = fixture(dir.path()).await;
        let metadata = FeaturePipelineMetadata {
            extraction: ExtractionMetadata::new(
                15,
                30,
                "https://example.test",
                datetime!(2023-12-01 01:00 UTC),
                datetime!(2023-12-01 03:00 UTC),
            )
            .unwrap(),
            feature_group_version: 2,
        };
        save_json(&metadata, FEATURE_PIPELINE_METADATA, dir.path()).unwrap();

        let summary = pipeline.run(BatchParams::default()).await.unwrap();

        assert_eq!(summary.feature_view_version, 2);
        assert_eq!(summary.start, datetime!(2023-12-01 01:00 UTC));
        assert_eq!(summary.observed_rows, 3);
    }

    #[tokio::test]
    async fn monitoring_keeps_history_and_newest_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = fixture(dir.path()).await;
        let params = |end| BatchParams {
            feature_view_version: Some(2),
            start: Some(datetime!(2023-12-01 00:00 UTC)),
            end: Some(end),
        };

        let first = pipeline.run(params(datetime!(2023-12-01 02:00 UTC))).await.unwrap();
        assert_eq!(first.monitored_rows, 3);

        let second = pipeline.run(params(datetime!(2023-12-01 03:00 UTC))).await.unwrap();
        // hours 3..=5 then 4..=6 overlap on 4 and 5
        assert_eq!(second.monitored_rows, 4);

        let monitoring = read_table(pipeline.bucket.as_ref(), MONITORING_BLOB).await.unwrap().unwrap();
        assert_eq!(consumption(&monitoring), vec![2.0, 3.0, 4.0, 3.0]);
    }

    #[tokio::test]
    async fn missing_metadata_without_overrides_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = fixture(dir.path()).await;

        let err = pipeline.run(BatchParams::default()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Cache(CacheError::NotFound(_))));
    }
}

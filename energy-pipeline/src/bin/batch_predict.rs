use std::sync::Arc;

use anyhow::{Context, Result};
use energy_pipeline::{
    config::AppConfig,
    metrics_textfile,
    model::{load_model, SeasonalNaiveForecaster},
    observability,
    pipeline::{BatchParams, BatchPredictionPipeline},
    sinks::{open_bucket, BucketFeatureStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let batch_cfg = cfg
        .batch
        .as_ref()
        .context("missing [batch] section in configuration")?;

    if cfg.metrics.is_some() {
        metrics_textfile::init();
    }

    let model: SeasonalNaiveForecaster = load_model(&batch_cfg.model_path)?;
    let bucket = open_bucket(&cfg.storage).await?;
    let pipeline = BatchPredictionPipeline {
        store: Arc::new(BucketFeatureStore::new(bucket.clone())),
        bucket,
        model,
        output_dir: cfg.output_dir.clone(),
        fh: batch_cfg.fh,
    };

    let outcome = pipeline.run(BatchParams::default()).await;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_textfile::write_snapshot(&metrics_cfg.textfile_path)?;
    }

    let summary = outcome?;
    tracing::info!(
        version = summary.feature_view_version,
        start = %summary.start,
        end = %summary.end,
        observed = summary.observed_rows,
        predicted = summary.predicted_rows,
        "batch prediction run complete"
    );
    Ok(())
}

use std::env;

use anyhow::{Context, Result};
use energy_pipeline::{
    config::AppConfig,
    metrics_textfile, observability,
    pipeline::{ExtractParams, FeaturePipeline},
    sinks::{open_bucket, BucketFeatureStore},
    sources::EnergiDataSource,
    transform,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Optional reference end time; defaults to now.
    let reference_end = match env::args().nth(1) {
        Some(arg) => Some(
            OffsetDateTime::parse(&arg, &Rfc3339)
                .with_context(|| format!("invalid RFC3339 reference time '{arg}'"))?,
        ),
        None => None,
    };

    let cfg = AppConfig::load()?;
    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("cannot create output dir {}", cfg.output_dir.display()))?;

    if cfg.metrics.is_some() {
        metrics_textfile::init();
    }

    let bucket = open_bucket(&cfg.storage).await?;
    let pipeline = FeaturePipeline {
        source: EnergiDataSource::new(&cfg.extract.url),
        transforms: transform::default_chain(),
        store: BucketFeatureStore::new(bucket),
        output_dir: cfg.output_dir.clone(),
        feature_group_version: cfg.feature_store.feature_group_version,
    };

    let outcome = pipeline
        .run(ExtractParams {
            reference_end,
            days_delay: cfg.extract.days_delay,
            days_export: cfg.extract.days_export,
        })
        .await;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_textfile::write_snapshot(&metrics_cfg.textfile_path)?;
    }

    match outcome? {
        Some(metadata) => tracing::info!(
            start = %metadata.extraction.export_datetime_utc_start,
            end = %metadata.extraction.export_datetime_utc_end,
            version = metadata.feature_group_version,
            "feature pipeline run complete"
        ),
        None => tracing::warn!("feature pipeline cycle skipped"),
    }
    Ok(())
}

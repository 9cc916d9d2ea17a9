use std::{collections::HashSet, sync::Arc};

use arrow::array::UInt32Array;
use arrow::compute::{concat_batches, take_record_batch};
use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::row::{RowConverter, SortField};
use energy_client::domain::consumption::{filter_closed_range, stable_order, DATETIME_UTC, INDEX_COLUMNS};
use energy_client::store::{FeatureStore, FeatureStoreError, FeatureView};
use time::OffsetDateTime;

use crate::sinks::bucket::{read_table, write_table, Bucket, StorageError};

/// Feature store kept as one Parquet blob per feature view version.
#[derive(Clone)]
pub struct BucketFeatureStore {
    bucket: Arc<dyn Bucket>,
}

impl BucketFeatureStore {
    pub fn new(bucket: Arc<dyn Bucket>) -> Self {
        Self { bucket }
    }

    pub fn blob_name(view: &str, version: u32) -> String {
        format!("feature_views/{view}/v{version}.parquet")
    }

    /// Upsert `rows` into a feature view version, keyed by
    /// `(area, consumer_type, datetime_utc)`. Returns the stored row count.
    pub async fn insert(&self, view: &str, version: u32, rows: &RecordBatch) -> Result<usize, StorageError> {
        let blob = Self::blob_name(view, version);
        let merged = match read_table(self.bucket.as_ref(), &blob).await? {
            Some(existing) => upsert(&existing, rows, &INDEX_COLUMNS),
            None => upsert(&rows.slice(0, 0), rows, &INDEX_COLUMNS),
        }
        .map_err(|e| StorageError::Codec {
            blob: blob.clone(),
            source: e.into(),
        })?;

        write_table(self.bucket.as_ref(), &blob, &merged).await?;
        metrics::counter!("feature_rows_inserted_total").increment(rows.num_rows() as u64);
        tracing::info!(
            view,
            version,
            inserted = rows.num_rows(),
            stored = merged.num_rows(),
            "feature view updated"
        );
        Ok(merged.num_rows())
    }
}

/// A feature view version loaded in full; range queries filter in memory.
struct LoadedFeatureView {
    data: RecordBatch,
}

#[async_trait::async_trait]
impl FeatureView for LoadedFeatureView {
    async fn get_batch_data(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<RecordBatch, FeatureStoreError> {
        Ok(filter_closed_range(&self.data, DATETIME_UTC, start, end)?)
    }
}

#[async_trait::async_trait]
impl FeatureStore for BucketFeatureStore {
    async fn get_feature_view(
        &self,
        name: &str,
        version: u32,
    ) -> Result<Box<dyn FeatureView>, FeatureStoreError> {
        let blob = Self::blob_name(name, version);
        match read_table(self.bucket.as_ref(), &blob).await {
            Ok(Some(data)) => Ok(Box::new(LoadedFeatureView { data })),
            Ok(None) => Err(FeatureStoreError::NotFound {
                name: name.to_string(),
                version,
            }),
            Err(StorageError::Auth(detail)) => Err(FeatureStoreError::Auth(detail)),
            Err(e) => Err(FeatureStoreError::Backend(e.to_string())),
        }
    }
}

/// Combine `existing` and `incoming` so that each key appears once, the
/// incoming row winning. The result has `incoming`'s schema and is sorted by
/// key.
///
/// Both sides must carry the same columns with the same types; stored history
/// is never cast or dropped to fit a new batch.
pub fn upsert(existing: &RecordBatch, incoming: &RecordBatch, keys: &[&str]) -> Result<RecordBatch, ArrowError> {
    let schema = incoming.schema();
    if let Some(stale) = existing
        .schema()
        .fields()
        .iter()
        .find(|f| schema.column_with_name(f.name()).is_none())
    {
        return Err(ArrowError::SchemaError(format!(
            "incoming rows lack stored column '{}'",
            stale.name()
        )));
    }
    let aligned = schema
        .fields()
        .iter()
        .map(|field| {
            if field.data_type() == &DataType::Null {
                return Err(ArrowError::SchemaError(format!(
                    "incoming column '{}' has no type",
                    field.name()
                )));
            }
            let column = existing.column_by_name(field.name()).ok_or_else(|| {
                ArrowError::SchemaError(format!("stored rows lack column '{}'", field.name()))
            })?;
            if column.data_type() != field.data_type() {
                return Err(ArrowError::SchemaError(format!(
                    "column '{}' is stored as {} but incoming as {}",
                    field.name(),
                    column.data_type(),
                    field.data_type()
                )));
            }
            Ok(column.clone())
        })
        .collect::<Result<Vec<_>, _>>()?;
    let existing = RecordBatch::try_new_with_options(
        schema.clone(),
        aligned,
        &RecordBatchOptions::new().with_row_count(Some(existing.num_rows())),
    )?;
    let combined = concat_batches(&schema, [&existing, incoming])?;

    let key_positions = keys
        .iter()
        .map(|k| schema.index_of(k))
        .collect::<Result<Vec<_>, _>>()?;
    let key_batch = combined.project(&key_positions)?;
    let converter = RowConverter::new(
        key_batch
            .schema()
            .fields()
            .iter()
            .map(|f| SortField::new(f.data_type().clone()))
            .collect(),
    )?;
    let rows = converter.convert_columns(key_batch.columns())?;

    let mut seen = HashSet::new();
    let mut keep: Vec<u32> = (0..combined.num_rows())
        .rev()
        .filter(|&i| seen.insert(rows.row(i).owned()))
        .map(|i| i as u32)
        .collect();
    keep.reverse();

    let deduped = take_record_batch(&combined, &UInt32Array::from(keep))?;
    let order = stable_order(&deduped.project(&key_positions)?)?;
    take_record_batch(&deduped, &order)
}

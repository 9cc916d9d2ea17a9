use time::OffsetDateTime;

use crate::domain::consumption::{
    align_to_hour, drop_column, IndexedTable, DATETIME_UTC, ENERGY_CONSUMPTION, HOUR_DK,
    INDEX_COLUMNS,
};
use crate::store::{FeatureStore, FeatureStoreError};

/// Feature view holding the Danish hourly consumption features.
pub const FEATURE_VIEW_NAME: &str = "energy_consumption_denmark_view";

pub const DEFAULT_TARGET: &str = ENERGY_CONSUMPTION;

/// Load `[start, end]` from the consumption feature view and split it into
/// exogenous features and the series to forecast.
///
/// Both returned tables are indexed by `(area, consumer_type, datetime_utc)`,
/// with `datetime_utc` aligned to whole hours, sorted ascending. Duplicate keys
/// are kept in their original relative order. The second table holds only
/// `target`.
pub async fn load_range(
    store: &dyn FeatureStore,
    feature_view_version: u32,
    start: OffsetDateTime,
    end: OffsetDateTime,
    target: &str,
) -> Result<(IndexedTable, IndexedTable), FeatureStoreError> {
    let view = store
        .get_feature_view(FEATURE_VIEW_NAME, feature_view_version)
        .await?;
    let data = view.get_batch_data(start, end).await?;

    let data = drop_column(&data, HOUR_DK)?;
    let schema = data.schema();
    for column in INDEX_COLUMNS {
        if schema.column_with_name(column).is_none() {
            return Err(FeatureStoreError::Key(column.to_string()));
        }
    }
    if INDEX_COLUMNS.contains(&target) || schema.column_with_name(target).is_none() {
        return Err(FeatureStoreError::Key(target.to_string()));
    }

    let data = align_to_hour(&data, DATETIME_UTC)?;
    let table = IndexedTable::from_batch(&data, &INDEX_COLUMNS)?.sort_by_index()?;
    let (exogenous, series) = table.split_value_column(target)?;

    Ok((exogenous, series))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use arrow::array::{
        Array, ArrayRef, AsArray, Float64Array, Int32Array, StringArray, TimestampSecondArray,
    };
    use arrow::datatypes::Float64Type;
    use arrow::record_batch::RecordBatch;
    use time::macros::datetime;

    use super::*;
    use crate::domain::consumption::{filter_closed_range, hourly_period_type};
    use crate::store::FeatureView;

    struct StaticView(RecordBatch);

    #[async_trait::async_trait]
    impl FeatureView for StaticView {
        async fn get_batch_data(
            &self,
            start: OffsetDateTime,
            end: OffsetDateTime,
        ) -> Result<RecordBatch, FeatureStoreError> {
            Ok(filter_closed_range(&self.0, DATETIME_UTC, start, end)?)
        }
    }

    #[derive(Default)]
    struct InMemoryStore {
        views: HashMap<(String, u32), RecordBatch>,
    }

    #[async_trait::async_trait]
    impl FeatureStore for InMemoryStore {
        async fn get_feature_view(
            &self,
            name: &str,
            version: u32,
        ) -> Result<Box<dyn FeatureView>, FeatureStoreError> {
            self.views
                .get(&(name.to_string(), version))
                .map(|batch| Box::new(StaticView(batch.clone())) as Box<dyn FeatureView>)
                .ok_or_else(|| FeatureStoreError::NotFound {
                    name: name.to_string(),
                    version,
                })
        }
    }

    fn consumption_batch() -> RecordBatch {
        RecordBatch::try_from_iter(vec![
            (
                "area",
                Arc::new(StringArray::from(vec!["DK2", "DK1", "DK1", "DK1", "DK1"])) as ArrayRef,
            ),
            (
                "consumer_type",
                Arc::new(Int32Array::from(vec![111, 111, 111, 111, 111])) as ArrayRef,
            ),
            (
                "datetime_utc",
                Arc::new(StringArray::from(vec![
                    "2023-12-01T10:00:00",
                    "2023-12-01T11:00:00",
                    "2023-12-01T10:00:00",
                    "2023-12-01T10:30:00",
                    "2023-12-05T00:00:00",
                ])) as ArrayRef,
            ),
            (
                "houdk",
                Arc::new(StringArray::from(vec![
                    "2023-12-01T11:00:00",
                    "2023-12-01T12:00:00",
                    "2023-12-01T11:00:00",
                    "2023-12-01T11:30:00",
                    "2023-12-05T01:00:00",
                ])) as ArrayRef,
            ),
            (
                "energy_consumption",
                Arc::new(Float64Array::from(vec![30.0, 20.0, 10.0, 11.0, 99.0])) as ArrayRef,
            ),
        ])
        .unwrap()
    }

    fn store_with_view(version: u32) -> InMemoryStore {
        let mut store = InMemoryStore::default();
        store
            .views
            .insert((FEATURE_VIEW_NAME.to_string(), version), consumption_batch());
        store
    }

    #[tokio::test]
    async fn splits_into_features_and_target_with_shared_index() {
        let store = store_with_view(1);
        let (x, y) = load_range(
            &store,
            1,
            datetime!(2023-12-01 00:00 UTC),
            datetime!(2023-12-02 00:00 UTC),
            DEFAULT_TARGET,
        )
        .await
        .unwrap();

        assert_eq!(x.num_rows(), 4);
        assert_eq!(x.index(), y.index());
        assert_eq!(y.values().num_columns(), 1);
        assert_eq!(y.values().schema().field(0).name(), "energy_consumption");
        // houdk is dropped and the target moved out: nothing left in X.
        assert_eq!(x.values().num_columns(), 0);
    }

    #[tokio::test]
    async fn sorts_by_key_and_keeps_duplicates_in_input_order() {
        let store = store_with_view(1);
        let (_, y) = load_range(
            &store,
            1,
            datetime!(2023-12-01 00:00 UTC),
            datetime!(2023-12-02 00:00 UTC),
            DEFAULT_TARGET,
        )
        .await
        .unwrap();

        // DK1 10:00 appears twice (10:00 and 10:30 both align to 10:00).
        let values = y.values().column(0).as_primitive::<Float64Type>();
        assert_eq!(values.values().to_vec(), vec![10.0, 11.0, 20.0, 30.0]);

        let hours = y
            .index()
            .column(2)
            .as_any()
            .downcast_ref::<TimestampSecondArray>()
            .unwrap();
        let ten = datetime!(2023-12-01 10:00 UTC).unix_timestamp();
        assert_eq!(hours.value(0), ten);
        assert_eq!(hours.value(1), ten);
        assert_eq!(hours.data_type(), &hourly_period_type());
    }

    #[tokio::test]
    async fn uses_the_requested_version() {
        let store = store_with_view(3);
        let err = load_range(
            &store,
            1,
            datetime!(2023-12-01 00:00 UTC),
            datetime!(2023-12-02 00:00 UTC),
            DEFAULT_TARGET,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FeatureStoreError::NotFound { version: 1, .. }));

        let ok = load_range(
            &store,
            3,
            datetime!(2023-12-01 00:00 UTC),
            datetime!(2023-12-02 00:00 UTC),
            DEFAULT_TARGET,
        )
        .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn missing_target_is_a_key_error() {
        let store = store_with_view(1);
        let err = load_range(
            &store,
            1,
            datetime!(2023-12-01 00:00 UTC),
            datetime!(2023-12-02 00:00 UTC),
            "price",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FeatureStoreError::Key(ref c) if c == "price"));
    }

    #[tokio::test]
    async fn view_without_value_columns_reports_missing_target() {
        let index_only = consumption_batch().project(&[0, 1, 2, 3]).unwrap();
        let mut store = InMemoryStore::default();
        store.views.insert((FEATURE_VIEW_NAME.to_string(), 1), index_only);

        let err = load_range(
            &store,
            1,
            datetime!(2023-12-01 00:00 UTC),
            datetime!(2023-12-02 00:00 UTC),
            DEFAULT_TARGET,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FeatureStoreError::Key(ref c) if c == "energy_consumption"));
    }
}

//! Persisted forecasting models.
//!
//! Models are stored as JSON documents and used only through [`Forecaster`],
//! so the batch pipeline does not care how a model was trained.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int32Array, Int8Array, TimestampSecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int32Type, Int8Type, TimestampSecondType};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use energy_client::domain::consumption::{AREA, CONSUMER_TYPE, DATETIME_UTC};
use energy_client::IndexedTable;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const SECONDS_PER_HOUR: i64 = 3_600;

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("model file {0} does not exist")]
    NotFound(PathBuf),
    #[error("cannot read model file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot deserialize model from {path}: {source}")]
    Deserialization { path: PathBuf, source: serde_json::Error },
    #[error("invalid model input: {0}")]
    Invalid(String),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

/// A model able to extend each series of `y` by `fh` hourly steps.
///
/// `y` is indexed by `(area, consumer_type, datetime_utc)` with a single
/// value column. The returned table uses the same index layout and value
/// column name, sorted by index.
pub trait Forecaster: Send + Sync {
    fn forecast(&self, y: &IndexedTable, fh: usize) -> Result<IndexedTable, ModelError>;
}

/// Load a model persisted as JSON at `path`.
pub fn load_model<M: DeserializeOwned>(path: &Path) -> Result<M, ModelError> {
    if !path.exists() {
        return Err(ModelError::NotFound(path.to_path_buf()));
    }

    let body = fs::read(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let model = serde_json::from_slice(&body).map_err(|source| ModelError::Deserialization {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::info!(path = %path.display(), "model loaded");
    Ok(model)
}

/// Predicts each hour as the observed value one season earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalNaiveForecaster {
    #[serde(default = "default_season_length")]
    pub season_length: usize,
}

fn default_season_length() -> usize {
    24
}

impl Default for SeasonalNaiveForecaster {
    fn default() -> Self {
        Self {
            season_length: default_season_length(),
        }
    }
}

impl Forecaster for SeasonalNaiveForecaster {
    fn forecast(&self, y: &IndexedTable, fh: usize) -> Result<IndexedTable, ModelError> {
        if self.season_length == 0 {
            return Err(ModelError::Invalid("season_length must be positive".to_string()));
        }
        if y.values().num_columns() != 1 {
            return Err(ModelError::Invalid(format!(
                "expected one target column, got {}",
                y.values().num_columns()
            )));
        }

        let index = y.index();
        let areas = cast(column(index, AREA)?, &DataType::Int8)?;
        let areas = areas.as_primitive::<Int8Type>();
        let consumers = cast(column(index, CONSUMER_TYPE)?, &DataType::Int32)?;
        let consumers = consumers.as_primitive::<Int32Type>();
        let hours = column(index, DATETIME_UTC)?.as_primitive::<TimestampSecondType>();
        let target = cast(y.values().column(0), &DataType::Float64)?;
        let target = target.as_primitive::<Float64Type>();

        // Later duplicates overwrite earlier ones; the last observation wins.
        let mut observed: HashMap<(i8, i32, i64), Option<f64>> = HashMap::new();
        let mut last_hour: HashMap<(i8, i32), i64> = HashMap::new();
        for i in 0..y.num_rows() {
            if areas.is_null(i) || consumers.is_null(i) || hours.is_null(i) {
                return Err(ModelError::Invalid(format!("null index value in row {i}")));
            }
            let series = (areas.value(i), consumers.value(i));
            let hour = hours.value(i);
            let value = target.is_valid(i).then(|| target.value(i));
            observed.insert((series.0, series.1, hour), value);
            last_hour
                .entry(series)
                .and_modify(|h| *h = (*h).max(hour))
                .or_insert(hour);
        }

        let mut series: Vec<_> = last_hour.into_iter().collect();
        series.sort_unstable();

        let season = self.season_length as i64;
        let (mut out_area, mut out_consumer, mut out_hour, mut out_value) =
            (Vec::new(), Vec::new(), Vec::new(), Vec::new());
        for ((area, consumer), last) in series {
            for h in 1..=fh as i64 {
                let cycles = (h + season - 1) / season;
                let source = last + (h - cycles * season) * SECONDS_PER_HOUR;
                out_area.push(area);
                out_consumer.push(consumer);
                out_hour.push(last + h * SECONDS_PER_HOUR);
                out_value.push(observed.get(&(area, consumer, source)).copied().flatten());
            }
        }

        let index = RecordBatch::try_new(
            index.schema(),
            vec![
                cast(&(Arc::new(Int8Array::from(out_area)) as ArrayRef), index.schema().field_with_name(AREA)?.data_type())?,
                cast(
                    &(Arc::new(Int32Array::from(out_consumer)) as ArrayRef),
                    index.schema().field_with_name(CONSUMER_TYPE)?.data_type(),
                )?,
                Arc::new(TimestampSecondArray::from(out_hour).with_timezone_opt(hours.timezone().map(str::to_string))),
            ],
        )?;
        let values = RecordBatch::try_new(
            y.values().schema(),
            vec![cast(
                &(Arc::new(Float64Array::from(out_value)) as ArrayRef),
                y.values().schema().field(0).data_type(),
            )?],
        )?;

        Ok(IndexedTable::new(index, values)?.sort_by_index()?)
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, ModelError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| ModelError::Invalid(format!("index column '{name}' is missing")))
}

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, UInt32Array};
use arrow::compute::{cast, filter_record_batch, take_record_batch};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit, TimestampSecondType};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::row::{RowConverter, SortField};
use time::OffsetDateTime;

pub const AREA: &str = "area";
pub const CONSUMER_TYPE: &str = "consumer_type";
pub const DATETIME_UTC: &str = "datetime_utc";
/// Local (Danish) hour label. Redundant with `datetime_utc`.
pub const HOUR_DK: &str = "houdk";
pub const ENERGY_CONSUMPTION: &str = "energy_consumption";

/// Composite key of a consumption table, outermost level first.
pub const INDEX_COLUMNS: [&str; 3] = [AREA, CONSUMER_TYPE, DATETIME_UTC];

const SECONDS_PER_HOUR: i64 = 3_600;

/// Arrow type used for hourly periods: whole-hour UTC instants at second resolution.
pub fn hourly_period_type() -> DataType {
    DataType::Timestamp(TimeUnit::Second, Some("UTC".into()))
}

/// A table split into a key part (`index`) and a payload part (`values`).
///
/// Both halves always have the same number of rows; row `i` of `values` is
/// addressed by row `i` of `index`. Keys are not required to be unique.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedTable {
    index: RecordBatch,
    values: RecordBatch,
}

impl IndexedTable {
    pub fn new(index: RecordBatch, values: RecordBatch) -> Result<Self, ArrowError> {
        if index.num_rows() != values.num_rows() {
            return Err(ArrowError::InvalidArgumentError(format!(
                "index has {} rows but values have {}",
                index.num_rows(),
                values.num_rows()
            )));
        }
        Ok(Self { index, values })
    }

    /// Move `index_columns` (in the given order) into the index; everything
    /// else stays a value column.
    pub fn from_batch(batch: &RecordBatch, index_columns: &[&str]) -> Result<Self, ArrowError> {
        let schema = batch.schema();
        let key_positions = index_columns
            .iter()
            .map(|name| schema.index_of(name))
            .collect::<Result<Vec<_>, _>>()?;
        let value_positions: Vec<usize> = (0..schema.fields().len())
            .filter(|i| !key_positions.contains(i))
            .collect();

        Self::new(batch.project(&key_positions)?, batch.project(&value_positions)?)
    }

    pub fn index(&self) -> &RecordBatch {
        &self.index
    }

    pub fn values(&self) -> &RecordBatch {
        &self.values
    }

    pub fn num_rows(&self) -> usize {
        self.index.num_rows()
    }

    /// Sort rows ascending by the full index. The sort is stable, so rows
    /// sharing a key keep their relative order and nothing is deduplicated.
    pub fn sort_by_index(&self) -> Result<Self, ArrowError> {
        let order = stable_order(&self.index)?;
        Self::new(take_rows(&self.index, &order)?, take_rows(&self.values, &order)?)
    }

    /// Split one value column off. Returns `(rest, column)`; both halves keep
    /// this table's index.
    pub fn split_value_column(&self, name: &str) -> Result<(Self, Self), ArrowError> {
        let position = self.values.schema().index_of(name)?;
        let rest: Vec<usize> = (0..self.values.num_columns())
            .filter(|i| *i != position)
            .collect();

        Ok((
            Self::new(self.index.clone(), self.values.project(&rest)?)?,
            Self::new(self.index.clone(), self.values.project(&[position])?)?,
        ))
    }

    /// Flatten back into one batch, index columns first.
    pub fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let fields: Vec<Arc<Field>> = self
            .index
            .schema()
            .fields()
            .iter()
            .chain(self.values.schema().fields().iter())
            .cloned()
            .collect();
        let columns: Vec<ArrayRef> = self
            .index
            .columns()
            .iter()
            .chain(self.values.columns().iter())
            .cloned()
            .collect();

        RecordBatch::try_new_with_options(
            Arc::new(Schema::new(fields)),
            columns,
            &RecordBatchOptions::new().with_row_count(Some(self.num_rows())),
        )
    }
}

/// `take_record_batch` that also accepts a batch without columns.
fn take_rows(batch: &RecordBatch, indices: &UInt32Array) -> Result<RecordBatch, ArrowError> {
    if batch.num_columns() == 0 {
        return RecordBatch::try_new_with_options(
            batch.schema(),
            vec![],
            &RecordBatchOptions::new().with_row_count(Some(indices.len())),
        );
    }
    take_record_batch(batch, indices)
}

/// Row positions of `keys` in ascending key order, ties in input order.
pub fn stable_order(keys: &RecordBatch) -> Result<UInt32Array, ArrowError> {
    let converter = RowConverter::new(
        keys.schema()
            .fields()
            .iter()
            .map(|f| SortField::new(f.data_type().clone()))
            .collect(),
    )?;
    let rows = converter.convert_columns(keys.columns())?;

    let mut order: Vec<u32> = (0..keys.num_rows() as u32).collect();
    order.sort_by(|a, b| rows.row(*a as usize).cmp(&rows.row(*b as usize)));
    Ok(UInt32Array::from(order))
}

/// Remove `name` if present. A missing column is not an error.
pub fn drop_column(batch: &RecordBatch, name: &str) -> Result<RecordBatch, ArrowError> {
    match batch.schema().index_of(name) {
        Ok(position) => {
            let keep: Vec<usize> = (0..batch.num_columns()).filter(|i| *i != position).collect();
            batch.project(&keep)
        }
        Err(_) => Ok(batch.clone()),
    }
}

/// Replace `column` with its hourly period: cast to UTC seconds and floor to
/// the start of the hour. Accepts timestamp columns of any unit as well as
/// ISO-8601 strings (naive strings are read as UTC).
pub fn align_to_hour(batch: &RecordBatch, column: &str) -> Result<RecordBatch, ArrowError> {
    let schema = batch.schema();
    let position = schema.index_of(column)?;

    let seconds = cast(batch.column(position), &hourly_period_type())?;
    let hourly = seconds
        .as_primitive::<TimestampSecondType>()
        .unary::<_, TimestampSecondType>(|secs| secs - secs.rem_euclid(SECONDS_PER_HOUR))
        .with_timezone("UTC");

    let mut fields: Vec<Arc<Field>> = schema.fields().iter().cloned().collect();
    fields[position] = Arc::new(Field::new(
        column,
        hourly.data_type().clone(),
        fields[position].is_nullable(),
    ));
    let mut columns = batch.columns().to_vec();
    columns[position] = Arc::new(hourly);

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

/// Keep rows whose `column` lies in the closed interval `[start, end]`.
pub fn filter_closed_range(
    batch: &RecordBatch,
    column: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<RecordBatch, ArrowError> {
    let position = batch.schema().index_of(column)?;
    let seconds = cast(batch.column(position), &hourly_period_type())?;
    let (lo, hi) = (start.unix_timestamp(), end.unix_timestamp());

    let mask: BooleanArray = seconds
        .as_primitive::<TimestampSecondType>()
        .iter()
        .map(|v| v.map(|secs| secs >= lo && secs <= hi))
        .collect();

    filter_record_batch(batch, &mask)
}

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int8Array};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use energy_client::domain::consumption::{
    hourly_period_type, AREA, CONSUMER_TYPE, DATETIME_UTC, ENERGY_CONSUMPTION, HOUR_DK,
};

use crate::pipeline::Transform;

#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error("column '{0}' is missing")]
    MissingColumn(String),
    #[error("unknown price area '{0}'")]
    UnknownArea(String),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

/// API field names and the names used from the feature store onwards.
pub const API_COLUMN_NAMES: [(&str, &str); 5] = [
    ("HourUTC", DATETIME_UTC),
    ("HourDK", HOUR_DK),
    ("PriceArea", AREA),
    ("ConsumerType_DE35", CONSUMER_TYPE),
    ("TotalCon", ENERGY_CONSUMPTION),
];

/// Price areas in encoding order.
pub const AREAS: [&str; 3] = ["DK", "DK1", "DK2"];

/// Renames API fields. Columns not in the mapping pass through unchanged.
#[derive(Clone, Default)]
pub struct RenameColumns;

impl Transform for RenameColumns {
    fn name(&self) -> &'static str {
        "rename_columns"
    }

    fn apply(&self, input: RecordBatch) -> Result<RecordBatch, TransformError> {
        let schema = input.schema();
        let fields: Vec<Field> = schema
            .fields()
            .iter()
            .map(|f| {
                let renamed = API_COLUMN_NAMES
                    .iter()
                    .find(|(from, _)| *from == f.name())
                    .map(|(_, to)| *to);
                match renamed {
                    Some(to) => f.as_ref().clone().with_name(to),
                    None => f.as_ref().clone(),
                }
            })
            .collect();

        let renamed = Schema::new_with_metadata(fields, schema.metadata().clone());
        Ok(RecordBatch::try_new(Arc::new(renamed), input.columns().to_vec())?)
    }
}

/// Casts the known columns to the types the feature view stores.
/// Unparseable values fail the whole batch.
#[derive(Clone, Default)]
pub struct CastColumns;

impl CastColumns {
    fn target_types() -> [(&'static str, DataType); 4] {
        [
            (DATETIME_UTC, hourly_period_type()),
            (CONSUMER_TYPE, DataType::Int32),
            (ENERGY_CONSUMPTION, DataType::Float64),
            (AREA, DataType::Utf8),
        ]
    }
}

impl Transform for CastColumns {
    fn name(&self) -> &'static str {
        "cast_columns"
    }

    fn apply(&self, input: RecordBatch) -> Result<RecordBatch, TransformError> {
        let options = CastOptions {
            safe: false,
            ..Default::default()
        };
        let mut batch = input;
        for (column, to) in Self::target_types() {
            let position = batch
                .schema()
                .index_of(column)
                .map_err(|_| TransformError::MissingColumn(column.to_string()))?;
            let cast = cast_with_options(batch.column(position), &to, &options)?;
            batch = replace_column(&batch, position, cast)?;
        }
        Ok(batch)
    }
}

/// Replaces the price area label with its small integer code.
#[derive(Clone, Default)]
pub struct EncodeAreaColumn;

pub fn encode_area(area: &str) -> Option<i8> {
    AREAS.iter().position(|a| *a == area).map(|i| i as i8)
}

impl Transform for EncodeAreaColumn {
    fn name(&self) -> &'static str {
        "encode_area"
    }

    fn apply(&self, input: RecordBatch) -> Result<RecordBatch, TransformError> {
        let position = input
            .schema()
            .index_of(AREA)
            .map_err(|_| TransformError::MissingColumn(AREA.to_string()))?;
        let labels = cast_with_options(input.column(position), &DataType::Utf8, &CastOptions::default())?;

        let codes = labels
            .as_string::<i32>()
            .iter()
            .map(|label| match label {
                Some(label) => encode_area(label).map(Some).ok_or_else(|| TransformError::UnknownArea(label.to_string())),
                None => Err(TransformError::UnknownArea("null".to_string())),
            })
            .collect::<Result<Int8Array, _>>()?;

        Ok(replace_column(&input, position, Arc::new(codes))?)
    }
}

fn replace_column(batch: &RecordBatch, position: usize, column: ArrayRef) -> Result<RecordBatch, ArrowError> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields[position] = Field::new(fields[position].name(), column.data_type().clone(), true);

    let mut columns = batch.columns().to_vec();
    columns[position] = column;
    RecordBatch::try_new(Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone())), columns)
}

/// Steps applied to every extraction before it reaches the feature store.
pub fn default_chain() -> Vec<Arc<dyn Transform>> {
    vec![
        Arc::new(RenameColumns),
        Arc::new(CastColumns),
        Arc::new(EncodeAreaColumn),
    ]
}

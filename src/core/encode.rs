use crate::domain::model::{CellValue, ColumnType, TabularBatch, TypedColumn};
use crate::domain::table::StorageFormat;
use crate::utils::error::{EtlError, Result};
use arrow_array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

pub fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::Int => DataType::Int64,
        ColumnType::Float => DataType::Float64,
        ColumnType::String => DataType::Utf8,
        ColumnType::Date => DataType::Date32,
        ColumnType::Bool => DataType::Boolean,
    }
}

pub fn arrow_schema(columns: &[TypedColumn]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|c| Field::new(c.name.as_str(), arrow_type(c.declared_type), true))
            .collect::<Vec<_>>(),
    )
}

fn days_since_epoch(date: &NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (*date - epoch).num_days() as i32
}

fn column_array(batch: &TabularBatch, index: usize, column_type: ColumnType) -> ArrayRef {
    let cells = batch.rows.iter().map(|r| &r[index]);
    match column_type {
        ColumnType::Int => Arc::new(Int64Array::from(
            cells
                .map(|v| match v {
                    CellValue::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnType::Float => Arc::new(Float64Array::from(
            cells
                .map(|v| match v {
                    CellValue::Float(f) => Some(*f),
                    CellValue::Int(i) => Some(*i as f64),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnType::String => Arc::new(StringArray::from(
            cells.map(CellValue::render).collect::<Vec<Option<String>>>(),
        )),
        ColumnType::Date => Arc::new(Date32Array::from(
            cells
                .map(|v| match v {
                    CellValue::Date(d) => Some(days_since_epoch(d)),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnType::Bool => Arc::new(BooleanArray::from(
            cells
                .map(|v| match v {
                    CellValue::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
    }
}

pub fn encode_parquet(batch: &TabularBatch) -> Result<Vec<u8>> {
    let schema = Arc::new(arrow_schema(&batch.columns));
    let arrays: Vec<ArrayRef> = batch
        .columns
        .iter()
        .enumerate()
        .map(|(index, column)| column_array(batch, index, column.declared_type))
        .collect();
    let record_batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let mut buffer = Vec::new();
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema, Some(props))?;
    writer.write(&record_batch)?;
    writer.close()?;
    Ok(buffer)
}

/// CSV with a header line; nulls are empty fields.
pub fn encode_csv(batch: &TabularBatch) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(batch.columns.iter().map(|c| c.name.as_str()))?;
    for row in &batch.rows {
        writer.write_record(row.iter().map(|v| v.render().unwrap_or_default()))?;
    }
    writer
        .into_inner()
        .map_err(|e| EtlError::IoError(e.into_error()))
}

pub fn encode(batch: &TabularBatch, format: StorageFormat) -> Result<Vec<u8>> {
    if batch.columns.is_empty() {
        return Err(EtlError::ValidationError {
            message: "Batch has no data columns to write".to_string(),
        });
    }
    match format {
        StorageFormat::Parquet => encode_parquet(batch),
        StorageFormat::Csv => encode_csv(batch),
    }
}

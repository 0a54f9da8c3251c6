use crate::process::utils;
use arrow::{
    array::{Array, ArrayRef, Date32Array, Float64Builder, StringArray},
    datatypes::{DataType, Field, Schema},
    error::Result,
    record_batch::RecordBatch,
};
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;

/// Days between 0001-01-01 and 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Arrow `Date32` value (days since the Unix epoch) of `date`.
pub fn date32_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

/// Turn the named text columns into `Float64`. A cell that does not parse as
/// a finite number becomes null; the row itself is kept. Names that are not
/// in the batch, and columns that are not text, pass through untouched.
pub fn coerce_numeric<S: AsRef<str>>(batch: &RecordBatch, numeric: &[S]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut out = Vec::with_capacity(batch.num_columns());

    for (arr, fld) in batch.columns().iter().zip(schema.fields()) {
        let wanted = numeric.iter().any(|n| n.as_ref() == fld.name());
        match arr.as_any().downcast_ref::<StringArray>() {
            Some(sarr) if wanted => {
                let mut b = Float64Builder::with_capacity(sarr.len());
                for opt in sarr.iter() {
                    b.append_option(opt.and_then(utils::parse_number));
                }
                fields.push(Field::new(fld.name(), DataType::Float64, true));
                out.push(Arc::new(b.finish()) as ArrayRef);
            }
            _ => {
                fields.push(fld.as_ref().clone());
                out.push(arr.clone());
            }
        }
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), out)
}

/// Append a `Date32` column called `name` holding `date` on every row. An
/// existing column with that name is replaced.
pub fn with_date_column(batch: &RecordBatch, name: &str, date: NaiveDate) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(batch.num_columns() + 1);
    let mut out = Vec::with_capacity(batch.num_columns() + 1);
    for (arr, fld) in batch.columns().iter().zip(schema.fields()) {
        if fld.name() != name {
            fields.push(fld.as_ref().clone());
            out.push(arr.clone());
        }
    }

    let days = date32_days(date);
    fields.push(Field::new(name, DataType::Date32, true));
    out.push(Arc::new(Date32Array::from(vec![days; batch.num_rows()])) as ArrayRef);

    RecordBatch::try_new(Arc::new(Schema::new(fields)), out)
}

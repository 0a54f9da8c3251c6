// src/process/frame.rs

use anyhow::Result;
use arrow::{
    array::{new_null_array, ArrayRef, BooleanArray},
    compute::{concat_batches, filter_record_batch},
    csv::WriterBuilder,
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
    row::{RowConverter, SortField},
};
use std::{collections::HashSet, path::Path, sync::Arc};
use thiserror::Error;

use crate::history::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("column {column:?} is {found} here but {expected} in earlier input")]
pub struct SchemaConflict {
    pub column: String,
    pub expected: DataType,
    pub found: DataType,
}

/// Accumulates batches whose column sets may differ. The result carries the
/// union of all columns in first-seen order; a batch lacking a column gets
/// nulls there.
#[derive(Default)]
pub struct FrameBuilder {
    fields: Vec<Field>,
    batches: Vec<RecordBatch>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch. A column whose type disagrees with an earlier batch is
    /// rejected and the builder is left unchanged.
    pub fn push(&mut self, batch: RecordBatch) -> Result<(), SchemaConflict> {
        let schema = batch.schema();
        for f in schema.fields() {
            if let Some(existing) = self.fields.iter().find(|e| e.name() == f.name()) {
                if existing.data_type() != f.data_type() {
                    return Err(SchemaConflict {
                        column: f.name().clone(),
                        expected: existing.data_type().clone(),
                        found: f.data_type().clone(),
                    });
                }
            }
        }
        for f in schema.fields() {
            if !self.fields.iter().any(|e| e.name() == f.name()) {
                self.fields
                    .push(Field::new(f.name(), f.data_type().clone(), true));
            }
        }
        self.batches.push(batch);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    /// Concatenate everything pushed so far, or `None` if nothing was.
    pub fn finish(self) -> Result<Option<RecordBatch>> {
        if self.batches.is_empty() {
            return Ok(None);
        }
        let schema: SchemaRef = Arc::new(Schema::new(self.fields));
        let aligned = self
            .batches
            .iter()
            .map(|b| align(b, &schema))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(concat_batches(&schema, &aligned)?))
    }
}

fn align(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .map(|f| match batch.column_by_name(f.name()) {
            Some(col) => col.clone(),
            None => new_null_array(f.data_type(), batch.num_rows()),
        })
        .collect();
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Drop every row that equals an earlier row in all columns. Nulls compare
/// equal to nulls. Row order of the survivors is preserved.
pub fn dedup_rows(batch: &RecordBatch) -> Result<RecordBatch> {
    if batch.num_columns() == 0 || batch.num_rows() == 0 {
        return Ok(batch.clone());
    }
    let sort_fields: Vec<SortField> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| SortField::new(f.data_type().clone()))
        .collect();
    let converter = RowConverter::new(sort_fields)?;
    let rows = converter.convert_columns(batch.columns())?;

    let mut seen = HashSet::with_capacity(rows.num_rows());
    let mask: BooleanArray = rows.iter().map(|row| Some(seen.insert(row))).collect();
    Ok(filter_record_batch(batch, &mask)?)
}

/// Write `batch` as a headed CSV, replacing `dest` atomically. Nulls become
/// empty fields; dates are written as `YYYY-MM-DD`.
pub fn write_csv(dest: &Path, batch: &RecordBatch) -> Result<()> {
    write_atomic(dest, |tmp| {
        let mut writer = WriterBuilder::new().with_header(true).build(&mut *tmp);
        writer.write(batch)?;
        drop(writer);
        Ok(())
    })
}

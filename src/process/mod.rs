// src/process/mod.rs
pub mod convert;
pub mod date_parser;
pub mod frame;
pub mod normalize;
pub mod utils;

use anyhow::{bail, Context, Result};
use arrow::{
    array::{ArrayRef, StringArray},
    datatypes::{DataType, Field, Schema},
    error::ArrowError,
    record_batch::RecordBatch,
};
use csv::ReaderBuilder;
use std::{fs::File, io::BufReader, path::Path, sync::Arc};
use tracing::trace;

use utils::blank_header_label;

/// One delimited-text file as read from disk, before any typing.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Header labels exactly as the file has them; blank cells get a
    /// positional `Unnamed: N` label.
    pub headers: Vec<String>,
    /// Data rows, padded to the header width. Empty cells are `None`.
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// All-text Arrow view of this table.
    pub fn into_batch(self) -> Result<RecordBatch, ArrowError> {
        let width = self.headers.len();
        let mut columns: Vec<Vec<Option<String>>> =
            (0..width).map(|_| Vec::with_capacity(self.rows.len())).collect();
        for row in self.rows {
            for (col, cell) in columns.iter_mut().zip(row) {
                col.push(cell);
            }
        }

        let fields: Vec<Field> = self
            .headers
            .iter()
            .map(|h| Field::new(h, DataType::Utf8, true))
            .collect();
        let arrays: Vec<ArrayRef> = columns
            .into_iter()
            .map(|c| Arc::new(StringArray::from(c)) as ArrayRef)
            .collect();

        RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
    }
}

/// Read a headed CSV. Short rows are padded with missing cells; a row with
/// more cells than the header is a schema error.
pub fn load_csv(path: &Path) -> Result<RawTable> {
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = rdr
        .byte_headers()
        .with_context(|| format!("reading header row of {:?}", path))?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let label = String::from_utf8_lossy(h);
            let label = label.trim_start_matches('\u{feff}').trim();
            if label.is_empty() {
                blank_header_label(i)
            } else {
                label.to_string()
            }
        })
        .collect();
    if headers.is_empty() {
        bail!("{:?} has no header row", path);
    }

    let width = headers.len();
    let mut rows = Vec::new();
    for (idx, result) in rdr.byte_records().enumerate() {
        let record =
            result.with_context(|| format!("CSV parse error in {:?} at record {}", path, idx))?;
        if record.len() > width {
            bail!(
                "{:?} record {} has {} fields but the header has {}",
                path,
                idx,
                record.len(),
                width
            );
        }
        let mut row: Vec<Option<String>> = record
            .iter()
            .map(|cell| {
                if cell.is_empty() {
                    None
                } else {
                    Some(String::from_utf8_lossy(cell).to_string())
                }
            })
            .collect();
        row.resize(width, None);
        rows.push(row);
    }
    trace!(file = %path.display(), rows = rows.len(), columns = width, "loaded csv");

    Ok(RawTable { headers, rows })
}

/// `load_csv` straight into an all-text record batch.
pub fn load_text_batch(path: &Path) -> Result<RecordBatch> {
    Ok(load_csv(path)?.into_batch()?)
}

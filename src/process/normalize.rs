// src/process/normalize.rs

use arrow::{
    array::{Array, BooleanArray, StringArray},
    compute::filter_record_batch,
    error::ArrowError,
    record_batch::RecordBatch,
};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::asset::AssetClass;
use crate::config::{Config, EquityConfig, IndexConfig};
use crate::process::convert::{coerce_numeric, with_date_column};
use crate::process::date_parser::{FilenameConvention, FilenameDateError};
use crate::process::load_csv;
use crate::process::utils::{match_key, normalize_header};

/// Name of the derived column holding each row's trade date.
pub const TRADE_DATE_COLUMN: &str = "trade_date";

const EQUITY_FILTER_COLUMN: &str = "series";
const INDEX_FILTER_COLUMN: &str = "index_name";

/// Header renames applied to current-scheme equity files so they line up
/// with the legacy bhavcopy columns.
const CURRENT_SCHEME_ALIASES: [(&str, &str); 12] = [
    ("TckrSymb", "SYMBOL"),
    ("SctySrs", "SERIES"),
    ("OpnPric", "OPEN"),
    ("HghPric", "HIGH"),
    ("LwPric", "LOW"),
    ("ClsPric", "CLOSE"),
    ("LastPric", "LAST"),
    ("PrvsClsgPric", "PREVCLOSE"),
    ("TtlTradgVol", "TOTTRDQTY"),
    ("TtlTrfVal", "TOTTRDVAL"),
    ("TradDt", "TIMESTAMP"),
    ("TtlNbOfTxsExctd", "TOTALTRADES"),
];

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Date(#[from] FilenameDateError),
    #[error("malformed CSV: {0}")]
    Malformed(String),
    #[error("expected column {column:?} is missing")]
    MissingColumn { column: String },
    #[error(transparent)]
    Arrow(#[from] ArrowError),
}

/// What became of one daily file.
#[derive(Debug)]
pub enum FileOutcome {
    Normalized { file: String, batch: RecordBatch },
    /// The file was readable but no row survived the filter.
    Skipped { file: String, reason: String },
    Failed { file: String, cause: NormalizeError },
}

impl FileOutcome {
    pub fn file(&self) -> &str {
        match self {
            FileOutcome::Normalized { file, .. }
            | FileOutcome::Skipped { file, .. }
            | FileOutcome::Failed { file, .. } => file,
        }
    }
}

/// Per-asset normalization settings.
#[derive(Debug, Clone)]
pub struct NormalizeRules {
    pub asset: AssetClass,
    /// Normalized label of the column the row filter looks at.
    pub filter_column: String,
    /// Accepted filter values, stored as match keys.
    pub targets: Vec<String>,
    /// Whether header normalization turns spaces into underscores.
    pub replace_spaces: bool,
    pub drop_columns: Vec<String>,
    pub numeric_columns: Vec<String>,
}

impl NormalizeRules {
    pub fn equity(cfg: &EquityConfig) -> Self {
        Self {
            asset: AssetClass::Equity,
            filter_column: EQUITY_FILTER_COLUMN.into(),
            targets: vec![match_key(&cfg.series_code)],
            replace_spaces: false,
            drop_columns: cfg.drop_columns.clone(),
            numeric_columns: cfg.numeric_columns.clone(),
        }
    }

    pub fn index(cfg: &IndexConfig) -> Self {
        Self {
            asset: AssetClass::Index,
            filter_column: INDEX_FILTER_COLUMN.into(),
            targets: cfg.targets.iter().map(|t| match_key(t)).collect(),
            replace_spaces: true,
            drop_columns: Vec::new(),
            numeric_columns: cfg.numeric_columns.clone(),
        }
    }

    pub fn for_asset(config: &Config, asset: AssetClass) -> Self {
        match asset {
            AssetClass::Equity => Self::equity(&config.equity),
            AssetClass::Index => Self::index(&config.index),
        }
    }
}

/// Turns one daily CSV into the filtered, typed, dated rows of interest.
pub struct RowNormalizer {
    rules: NormalizeRules,
}

impl RowNormalizer {
    pub fn new(rules: NormalizeRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &NormalizeRules {
        &self.rules
    }

    /// Normalize one file. Never fails: every problem is logged and reported
    /// in the outcome.
    pub fn normalize_file(&self, path: &Path) -> FileOutcome {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        match self.try_normalize(path, &file) {
            Ok(batch) if batch.num_rows() == 0 => {
                let reason = format!(
                    "no rows with {} in {:?}",
                    self.rules.filter_column, self.rules.targets
                );
                warn!(file = %file, reason = %reason, "empty result");
                FileOutcome::Skipped { file, reason }
            }
            Ok(batch) => {
                debug!(file = %file, rows = batch.num_rows(), "normalized");
                FileOutcome::Normalized { file, batch }
            }
            Err(cause) => {
                error!(file = %file, error = %cause, "skipping file");
                FileOutcome::Failed { file, cause }
            }
        }
    }

    fn try_normalize(&self, path: &Path, file: &str) -> Result<RecordBatch, NormalizeError> {
        let convention = FilenameConvention::detect_for(self.rules.asset, file)
            .ok_or_else(|| FilenameDateError::UnknownConvention(file.to_string()))?;
        let date = convention.parse_date(file)?;

        let mut table = load_csv(path).map_err(|e| NormalizeError::Malformed(format!("{:#}", e)))?;
        if convention == FilenameConvention::CurrentEquity {
            alias_current_headers(&mut table.headers);
        }
        for h in table.headers.iter_mut() {
            *h = normalize_header(h, self.rules.replace_spaces);
        }
        let batch = table.into_batch()?;

        let filtered = self.filter_rows(&batch)?;
        let keep: Vec<usize> = filtered
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| !self.rules.drop_columns.iter().any(|d| d == f.name()))
            .map(|(i, _)| i)
            .collect();
        let trimmed = filtered.project(&keep)?;

        let typed = coerce_numeric(&trimmed, &self.rules.numeric_columns)?;
        Ok(with_date_column(&typed, TRADE_DATE_COLUMN, date)?)
    }

    /// Keep rows whose filter column, reduced to its match key, is one of the
    /// targets. Exact match only; a missing cell never matches.
    fn filter_rows(&self, batch: &RecordBatch) -> Result<RecordBatch, NormalizeError> {
        let missing = || NormalizeError::MissingColumn {
            column: self.rules.filter_column.clone(),
        };
        let idx = batch
            .schema()
            .index_of(&self.rules.filter_column)
            .map_err(|_| missing())?;
        let values = batch
            .column(idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(missing)?;

        let mask: BooleanArray = values
            .iter()
            .map(|v| Some(v.map(|s| self.rules.targets.contains(&match_key(s))).unwrap_or(false)))
            .collect();
        debug!(
            rows = values.len(),
            kept = mask.true_count(),
            column = %self.rules.filter_column,
            "row filter applied"
        );
        Ok(filter_record_batch(batch, &mask)?)
    }
}

fn alias_current_headers(headers: &mut [String]) {
    for h in headers.iter_mut() {
        if let Some((_, legacy)) = CURRENT_SCHEME_ALIASES
            .iter()
            .find(|(current, _)| *current == h.trim())
        {
            *h = (*legacy).to_string();
        }
    }
}

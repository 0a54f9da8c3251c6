use chrono::NaiveDate;
use thiserror::Error;

use crate::asset::AssetClass;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

const LEGACY_PREFIX: &str = "cm";
const LEGACY_SUFFIX: &str = "bhav.csv";
const CURRENT_PREFIX: &str = "BhavCopy_NSE_CM_0_0_0_";
const CURRENT_SUFFIX: &str = "_F_0000.csv";
const INDEX_PREFIX: &str = "ind_close_all_";
const INDEX_SUFFIX: &str = ".csv";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameDateError {
    #[error("{0} does not follow a known daily filename convention")]
    UnknownConvention(String),
    #[error("{file}: {found:?} is not a valid {format} date")]
    BadDate {
        file: String,
        found: String,
        format: &'static str,
    },
}

/// Filename conventions of the daily CSVs. Each one encodes the trade date at
/// a fixed position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilenameConvention {
    /// `cmDDMONYYYYbhav.csv`, date at characters 2..=10.
    LegacyEquity,
    /// `BhavCopy_NSE_CM_0_0_0_YYYYMMDD_F_0000.csv`
    CurrentEquity,
    /// `ind_close_all_DDMMYYYY.csv`, date in the 8 characters before `.csv`.
    Index,
}

impl FilenameConvention {
    pub fn detect(file_name: &str) -> Option<Self> {
        if file_name.starts_with(LEGACY_PREFIX)
            && file_name.ends_with(LEGACY_SUFFIX)
            && file_name.len() == LEGACY_PREFIX.len() + 9 + LEGACY_SUFFIX.len()
        {
            Some(Self::LegacyEquity)
        } else if file_name.starts_with(CURRENT_PREFIX) && file_name.ends_with(CURRENT_SUFFIX) {
            Some(Self::CurrentEquity)
        } else if file_name.starts_with(INDEX_PREFIX) && file_name.ends_with(INDEX_SUFFIX) {
            Some(Self::Index)
        } else {
            None
        }
    }

    /// Like `detect`, but only accepts conventions belonging to `asset`.
    pub fn detect_for(asset: AssetClass, file_name: &str) -> Option<Self> {
        Self::detect(file_name).filter(|c| c.asset() == asset)
    }

    pub fn asset(&self) -> AssetClass {
        match self {
            Self::LegacyEquity | Self::CurrentEquity => AssetClass::Equity,
            Self::Index => AssetClass::Index,
        }
    }

    pub fn parse_date(&self, file_name: &str) -> Result<NaiveDate, FilenameDateError> {
        match self {
            Self::LegacyEquity => {
                let found = slice(file_name, 2, 11)?;
                parse_dd_mon_yyyy(found).ok_or_else(|| bad(file_name, found, "DDMONYYYY"))
            }
            Self::CurrentEquity => {
                let start = CURRENT_PREFIX.len();
                let found = slice(file_name, start, start + 8)?;
                parse_digits(found, (6, 8), (4, 6), (0, 4))
                    .ok_or_else(|| bad(file_name, found, "YYYYMMDD"))
            }
            Self::Index => {
                let end = file_name
                    .len()
                    .checked_sub(INDEX_SUFFIX.len())
                    .ok_or_else(|| unknown(file_name))?;
                let start = end.checked_sub(8).ok_or_else(|| unknown(file_name))?;
                let found = slice(file_name, start, end)?;
                parse_digits(found, (0, 2), (2, 4), (4, 8))
                    .ok_or_else(|| bad(file_name, found, "DDMMYYYY"))
            }
        }
    }
}

/// Detect the convention of `file_name` and derive its trade date.
pub fn trade_date(file_name: &str) -> Result<(FilenameConvention, NaiveDate), FilenameDateError> {
    let convention = FilenameConvention::detect(file_name).ok_or_else(|| unknown(file_name))?;
    Ok((convention, convention.parse_date(file_name)?))
}

fn slice(file_name: &str, start: usize, end: usize) -> Result<&str, FilenameDateError> {
    file_name.get(start..end).ok_or_else(|| unknown(file_name))
}

fn unknown(file_name: &str) -> FilenameDateError {
    FilenameDateError::UnknownConvention(file_name.to_string())
}

fn bad(file_name: &str, found: &str, format: &'static str) -> FilenameDateError {
    FilenameDateError::BadDate {
        file: file_name.to_string(),
        found: found.to_string(),
        format,
    }
}

fn parse_dd_mon_yyyy(s: &str) -> Option<NaiveDate> {
    let day: u32 = digits(s.get(0..2)?)?;
    let mon = s.get(2..5)?.to_ascii_uppercase();
    let month = MONTHS.iter().position(|m| *m == mon)? as u32 + 1;
    let year: i32 = digits(s.get(5..9)?)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse an all-digit date given the (start, end) byte ranges of its parts.
fn parse_digits(
    s: &str,
    day: (usize, usize),
    month: (usize, usize),
    year: (usize, usize),
) -> Option<NaiveDate> {
    let d: u32 = digits(s.get(day.0..day.1)?)?;
    let m: u32 = digits(s.get(month.0..month.1)?)?;
    let y: i32 = digits(s.get(year.0..year.1)?)?;
    NaiveDate::from_ymd_opt(y, m, d)
}

fn digits<T: std::str::FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

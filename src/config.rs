// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::asset::AssetClass;

/// Requests closer together than this are never issued, whatever the config says.
pub const MIN_REQUEST_DELAY: Duration = Duration::from_millis(1_000);

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "bhavcopy.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub remote: RemoteConfig,
    pub equity: EquityConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_root: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl PathsConfig {
    /// Where the Acquirer stores daily files for `asset`.
    pub fn raw_dir(&self, asset: AssetClass) -> PathBuf {
        self.data_root.join("raw").join(asset.as_str())
    }

    pub fn extracted_dir(&self) -> PathBuf {
        self.data_root.join("extracted")
    }

    pub fn processed_dir(&self, asset: AssetClass) -> PathBuf {
        self.data_root.join("processed").join(asset.as_str())
    }

    /// Directory the Row Normalizer reads daily CSVs from. Index files are
    /// served uncompressed, so they are read straight from the raw directory.
    pub fn daily_csv_dir(&self, asset: AssetClass) -> PathBuf {
        match asset {
            AssetClass::Equity => self.extracted_dir(),
            AssetClass::Index => self.raw_dir(AssetClass::Index),
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("pipeline.log")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub home_url: String,
    pub equity_legacy_base: String,
    pub equity_current_base: String,
    pub index_base: String,
    /// First year served under the current equity naming scheme.
    pub cutover_year: i32,
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub accept_language: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            home_url: "https://www.nseindia.com".into(),
            equity_legacy_base: "https://archives.nseindia.com/content/historical/EQUITIES".into(),
            equity_current_base: "https://nsearchives.nseindia.com/content/cm".into(),
            index_base: "https://archives.nseindia.com/content/indices".into(),
            cutover_year: 2024,
            request_delay_ms: 1_500,
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".into(),
            accept_language: "en-US,en;q=0.9".into(),
        }
    }
}

impl RemoteConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms).max(MIN_REQUEST_DELAY)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EquityConfig {
    pub series_code: String,
    pub numeric_columns: Vec<String>,
    pub drop_columns: Vec<String>,
    pub dataset_prefix: String,
}

impl Default for EquityConfig {
    fn default() -> Self {
        Self {
            series_code: "EQ".into(),
            numeric_columns: [
                "open",
                "high",
                "low",
                "close",
                "last",
                "prevclose",
                "tottrdqty",
                "tottrdval",
                "totaltrades",
            ]
            .map(String::from)
            .to_vec(),
            drop_columns: vec!["unnamed: 13".into()],
            dataset_prefix: "nse".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Whitelist of index names kept by the normalizer.
    pub targets: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub dataset_prefix: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            targets: vec!["NIFTY 50".into()],
            numeric_columns: [
                "open_index_value",
                "high_index_value",
                "low_index_value",
                "closing_index_value",
                "points_change",
                "change(%)",
                "volume",
                "turnover_(rs._cr.)",
                "p/e",
                "p/b",
                "div_yield",
            ]
            .map(String::from)
            .to_vec(),
            dataset_prefix: "nifty50_index".into(),
        }
    }
}

impl Config {
    /// Load from an explicit YAML file, or from `bhavcopy.yaml` if present,
    /// or fall back to the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let p = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !p.is_file() {
                    return Ok(Self::default());
                }
                p
            }
        };
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading config {:?}", path))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {:?}", path))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Create every directory the pipeline reads from or writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        let p = &self.paths;
        for d in [
            p.raw_dir(AssetClass::Equity),
            p.raw_dir(AssetClass::Index),
            p.extracted_dir(),
            p.processed_dir(AssetClass::Equity),
            p.processed_dir(AssetClass::Index),
            p.log_dir.clone(),
        ] {
            fs::create_dir_all(&d).with_context(|| format!("creating directory {:?}", d))?;
            debug!(dir = %d.display(), "ensured");
        }
        Ok(())
    }

    /// Prefix of the yearly/master dataset files for `asset`.
    pub fn dataset_prefix(&self, asset: AssetClass) -> &str {
        match asset {
            AssetClass::Equity => &self.equity.dataset_prefix,
            AssetClass::Index => &self.index.dataset_prefix,
        }
    }
}

// src/merge/master.rs

use anyhow::{Context, Result};
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

use crate::asset::AssetClass;
use crate::config::Config;
use crate::process::frame::{dedup_rows, write_csv, FrameBuilder};
use crate::process::load_text_batch;

pub fn master_file_name(prefix: &str) -> String {
    format!("{}_master.csv", prefix)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MasterSummary {
    /// Yearly files found.
    pub inputs: usize,
    pub merged: usize,
    pub unreadable: usize,
    pub rows_in: usize,
    pub rows_out: usize,
    pub written: Option<PathBuf>,
}

/// Concatenates every yearly dataset of one asset class into its master.
pub struct MasterAggregator {
    asset: AssetClass,
    dir: PathBuf,
    prefix: String,
    /// Full-row dedup after concatenation. On for the index stream only.
    dedup: bool,
}

impl MasterAggregator {
    pub fn new(asset: AssetClass, dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            asset,
            dir: dir.into(),
            prefix: prefix.into(),
            dedup: asset == AssetClass::Index,
        }
    }

    pub fn from_config(config: &Config, asset: AssetClass) -> Self {
        Self::new(
            asset,
            config.paths.processed_dir(asset),
            config.dataset_prefix(asset),
        )
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join(master_file_name(&self.prefix))
    }

    #[instrument(level = "info", skip(self), fields(asset = %self.asset, dir = %self.dir.display()))]
    pub fn run(&self) -> Result<MasterSummary> {
        let mut summary = MasterSummary::default();
        let inputs = self.yearly_files()?;
        summary.inputs = inputs.len();

        if inputs.is_empty() {
            warn!("no yearly datasets found, master not written");
            return Ok(summary);
        }
        info!(inputs = inputs.len(), dedup = self.dedup, "building master");

        let mut frame = FrameBuilder::new();
        for path in &inputs {
            let pushed = load_text_batch(path).and_then(|batch| {
                let rows = batch.num_rows();
                frame.push(batch)?;
                Ok(rows)
            });
            match pushed {
                Ok(rows) => {
                    debug!(file = %path.display(), rows, "merged");
                    summary.merged += 1;
                    summary.rows_in += rows;
                }
                Err(e) => {
                    error!(file = %path.display(), error = %format!("{:#}", e), "skipping unreadable yearly file");
                    summary.unreadable += 1;
                }
            }
        }

        let Some(mut batch) = frame.finish().context("concatenating yearly datasets")? else {
            warn!(unreadable = summary.unreadable, "no readable yearly datasets, master not written");
            return Ok(summary);
        };
        if self.dedup {
            batch = dedup_rows(&batch).context("deduplicating master rows")?;
        }
        summary.rows_out = batch.num_rows();

        let dest = self.output_path();
        write_csv(&dest, &batch).with_context(|| format!("writing master dataset {:?}", dest))?;
        info!(
            merged = summary.merged,
            unreadable = summary.unreadable,
            rows_in = summary.rows_in,
            rows_out = summary.rows_out,
            output = %dest.display(),
            "master dataset written"
        );
        summary.written = Some(dest);
        Ok(summary)
    }

    /// `<prefix>_<YYYY>.csv` files in the processed directory, name-sorted.
    /// The master itself never matches.
    fn yearly_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = Regex::new(&format!(r"^{}_\d{{4}}\.csv$", regex::escape(&self.prefix)))
            .context("building yearly filename pattern")?;
        list_matching(&self.dir, &pattern)
    }
}

fn list_matching(dir: &Path, pattern: &Regex) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {:?}", dir))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if pattern.is_match(&entry.file_name().to_string_lossy()) {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

// src/merge/yearly.rs

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument, warn};

use crate::asset::AssetClass;
use crate::config::Config;
use crate::process::date_parser::FilenameConvention;
use crate::process::frame::{write_csv, FrameBuilder};
use crate::process::normalize::{FileOutcome, NormalizeRules, RowNormalizer};

/// Name of the yearly dataset for `year`.
pub fn yearly_file_name(prefix: &str, year: i32) -> String {
    format!("{}_{:04}.csv", prefix, year)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct YearlySummary {
    /// Daily files whose filename date falls in the year.
    pub files: usize,
    pub normalized: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Daily-looking files anywhere in the directory whose filename date is
    /// invalid. They belong to no year, so they are not part of `failed`.
    pub undated: usize,
    pub rows: usize,
    /// Output path, if anything was written.
    pub written: Option<PathBuf>,
}

impl YearlySummary {
    fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Normalized { batch, .. } => {
                self.normalized += 1;
                self.rows += batch.num_rows();
            }
            FileOutcome::Skipped { .. } => self.skipped += 1,
            FileOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// A daily file picked for aggregation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DailyFile {
    date: NaiveDate,
    name: String,
    path: PathBuf,
}

/// Builds the per-year dataset of one asset class from its daily CSVs.
pub struct YearlyAggregator {
    asset: AssetClass,
    input_dir: PathBuf,
    output_dir: PathBuf,
    prefix: String,
    normalizer: RowNormalizer,
}

impl YearlyAggregator {
    pub fn new(
        rules: NormalizeRules,
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            asset: rules.asset,
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            prefix: prefix.into(),
            normalizer: RowNormalizer::new(rules),
        }
    }

    pub fn from_config(config: &Config, asset: AssetClass) -> Self {
        Self::new(
            NormalizeRules::for_asset(config, asset),
            config.paths.daily_csv_dir(asset),
            config.paths.processed_dir(asset),
            config.dataset_prefix(asset),
        )
    }

    pub fn output_path(&self, year: i32) -> PathBuf {
        self.output_dir.join(yearly_file_name(&self.prefix, year))
    }

    /// Normalize every daily file dated in `year` and write their
    /// concatenation, replacing any earlier output for that year. Nothing is
    /// written when no file yields rows.
    #[instrument(level = "info", skip(self), fields(asset = %self.asset))]
    pub fn run(&self, year: i32) -> Result<YearlySummary> {
        let mut summary = YearlySummary::default();
        let files = discover(&self.input_dir, self.asset, year, &mut summary)?;
        summary.files = files.len();

        if files.is_empty() {
            warn!(year, dir = %self.input_dir.display(), "no daily files for year");
            return Ok(summary);
        }
        info!(year, files = files.len(), "aggregating year");

        let mut frame = FrameBuilder::new();
        for daily in &files {
            let outcome = self.normalizer.normalize_file(&daily.path);
            summary.record(&outcome);
            if let FileOutcome::Normalized { file, batch } = outcome {
                let rows = batch.num_rows();
                if let Err(conflict) = frame.push(batch) {
                    error!(file = %file, error = %conflict, "schema error, excluding file");
                    summary.normalized -= 1;
                    summary.rows -= rows;
                    summary.failed += 1;
                }
            }
        }

        let Some(batch) = frame.finish().context("concatenating daily tables")? else {
            warn!(year, files = summary.files, "no rows for year, nothing written");
            return Ok(summary);
        };

        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("creating directory {:?}", self.output_dir))?;
        let dest = self.output_path(year);
        write_csv(&dest, &batch).with_context(|| format!("writing yearly dataset {:?}", dest))?;

        info!(
            year,
            files = summary.files,
            normalized = summary.normalized,
            skipped = summary.skipped,
            failed = summary.failed,
            undated = summary.undated,
            rows = batch.num_rows(),
            output = %dest.display(),
            "yearly dataset written"
        );
        summary.written = Some(dest);
        Ok(summary)
    }
}

/// Daily files of `asset` in `dir` whose filename date falls in `year`,
/// ordered by date then name. Names that look like daily files but carry an
/// invalid date are logged and counted as undated.
fn discover(
    dir: &Path,
    asset: AssetClass,
    year: i32,
    summary: &mut YearlySummary,
) -> Result<Vec<DailyFile>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {:?}", dir))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(convention) = FilenameConvention::detect_for(asset, &name) else {
            continue;
        };
        match convention.parse_date(&name) {
            Ok(date) if date.year() == year => files.push(DailyFile {
                date,
                name,
                path: entry.path(),
            }),
            Ok(_) => {}
            Err(e) => {
                error!(file = %name, error = %e, "skipping file with invalid filename date");
                summary.undated += 1;
            }
        }
    }
    files.sort();
    debug!(dir = %dir.display(), year, matched = files.len(), "daily files discovered");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EquityConfig, IndexConfig};
    use crate::process::load_csv;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    const LEGACY_HEADER: &str =
        "SYMBOL,SERIES,OPEN,HIGH,LOW,CLOSE,LAST,PREVCLOSE,TOTTRDQTY,TOTTRDVAL,TIMESTAMP,TOTALTRADES,ISIN,";
    const INDEX_HEADER: &str = "Index Name,Index Date,Open Index Value,High Index Value,Low Index Value,Closing Index Value,Points Change,Change(%),Volume,Turnover (Rs. Cr.),P/E,P/B,Div Yield";

    fn equity_day(dir: &Path, name: &str, rows: &[(&str, &str)]) {
        let mut body = format!("{}\n", LEGACY_HEADER);
        for (symbol, series) in rows {
            body.push_str(&format!(
                "{},{},1,2,0.5,1.5,1.5,1,100,150,X,3,INE0,\n",
                symbol, series
            ));
        }
        fs::write(dir.join(name), body).unwrap();
    }

    fn equity_aggregator(input: &Path, output: &Path) -> YearlyAggregator {
        YearlyAggregator::new(
            NormalizeRules::equity(&EquityConfig::default()),
            input,
            output,
            "nse",
        )
    }

    /// (trade_date, symbol) pairs of a written dataset, grouped by date.
    fn rows_by_date(path: &Path) -> BTreeMap<String, Vec<String>> {
        let table = load_csv(path).unwrap();
        let date_col = table.column_index("trade_date").unwrap();
        let sym_col = table.column_index("symbol").unwrap();
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in table.rows {
            out.entry(row[date_col].clone().unwrap())
                .or_default()
                .push(row[sym_col].clone().unwrap());
        }
        out
    }

    #[test]
    fn year_round_trips_by_trade_date() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("extracted");
        let output = tmp.path().join("processed");
        fs::create_dir_all(&input).unwrap();

        equity_day(&input, "cm02JAN2015bhav.csv", &[("BBB", "EQ"), ("CCC", "BE"), ("AAA", "EQ")]);
        equity_day(&input, "cm01JAN2015bhav.csv", &[("AAA", "EQ")]);
        equity_day(&input, "cm31DEC2015bhav.csv", &[("ZZZ", "EQ")]);
        equity_day(&input, "cm01JAN2016bhav.csv", &[("NEXT", "EQ")]);
        fs::write(input.join("readme.txt"), "ignored").unwrap();

        let summary = equity_aggregator(&input, &output).run(2015).unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(summary.normalized, 3);
        assert_eq!(summary.rows, 4);
        let dest = summary.written.unwrap();
        assert_eq!(dest, output.join("nse_2015.csv"));

        let by_date = rows_by_date(&dest);
        let expected: BTreeMap<String, Vec<String>> = [
            ("2015-01-01", vec!["AAA"]),
            ("2015-01-02", vec!["BBB", "AAA"]),
            ("2015-12-31", vec!["ZZZ"]),
        ]
        .into_iter()
        .map(|(d, s)| (d.to_string(), s.into_iter().map(String::from).collect()))
        .collect();
        assert_eq!(by_date, expected);

        // discovery order is by date, so the first data row is from Jan 1
        let table = load_csv(&dest).unwrap();
        let date_col = table.column_index("trade_date").unwrap();
        assert_eq!(table.rows[0][date_col].as_deref(), Some("2015-01-01"));
        assert!(table.column_index("unnamed: 13").is_none());
    }

    #[test]
    fn empty_year_writes_nothing() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("extracted");
        let output = tmp.path().join("processed");
        fs::create_dir_all(&input).unwrap();
        equity_day(&input, "cm01JAN2015bhav.csv", &[("AAA", "EQ")]);

        let summary = equity_aggregator(&input, &output).run(2014).unwrap();
        assert_eq!(summary.files, 0);
        assert!(summary.written.is_none());
        assert!(!output.join("nse_2014.csv").exists());
    }

    #[test]
    fn bad_files_are_excluded_and_the_rest_aggregated() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("extracted");
        let output = tmp.path().join("processed");
        fs::create_dir_all(&input).unwrap();

        equity_day(&input, "cm01JAN2015bhav.csv", &[("AAA", "EQ")]);
        fs::write(input.join("cm02JAN2015bhav.csv"), "SYMBOL,CLOSE\nAAA,1\n").unwrap();
        equity_day(&input, "cm05JAN2015bhav.csv", &[("AAA", "BE")]);
        equity_day(&input, "cm32JAN2015bhav.csv", &[("AAA", "EQ")]);
        equity_day(&input, "cm32JAN2016bhav.csv", &[("AAA", "EQ")]);

        let summary = equity_aggregator(&input, &output).run(2015).unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(summary.normalized, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.undated, 2);
        assert_eq!(summary.rows, 1);
        assert!(summary.written.is_some());
    }

    #[test]
    fn rerun_overwrites_previous_output() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("extracted");
        let output = tmp.path().join("processed");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("nse_2015.csv"), "stale\n").unwrap();
        equity_day(&input, "cm01JAN2015bhav.csv", &[("AAA", "EQ")]);

        let agg = equity_aggregator(&input, &output);
        agg.run(2015).unwrap();
        agg.run(2015).unwrap();
        let by_date = rows_by_date(&output.join("nse_2015.csv"));
        assert_eq!(by_date["2015-01-01"], vec!["AAA".to_string()]);
    }

    #[test]
    fn nifty_new_year_example() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("raw_index");
        let output = tmp.path().join("processed");
        fs::create_dir_all(&input).unwrap();
        fs::write(
            input.join("ind_close_all_01012015.csv"),
            format!(
                "{}\n\
                 NIFTY 50,01-01-2015,8272.8,8294.7,8248.75,8284,-1.2,-0.01,56560113,2430.14,22.3,3.91,1.25\n\
                 NIFTY Midcap 50,01-01-2015,3036.4,3045.1,3025.3,3039.35,2.1,0.07,2950050,310.7,-,3.1,1.0\n",
                INDEX_HEADER
            ),
        )
        .unwrap();

        let agg = YearlyAggregator::new(
            NormalizeRules::index(&IndexConfig::default()),
            &input,
            &output,
            "nifty50_index",
        );
        let summary = agg.run(2015).unwrap();
        let dest = summary.written.unwrap();
        assert_eq!(dest, output.join("nifty50_index_2015.csv"));

        let table = load_csv(&dest).unwrap();
        assert_eq!(table.rows.len(), 1);
        let name = table.column_index("index_name").unwrap();
        let date = table.column_index("trade_date").unwrap();
        assert_eq!(table.rows[0][name].as_deref(), Some("NIFTY 50"));
        assert_eq!(table.rows[0][date].as_deref(), Some("2015-01-01"));
    }

    #[test]
    fn missing_input_dir_is_an_empty_year() {
        let tmp = tempdir().unwrap();
        let summary = equity_aggregator(&tmp.path().join("nope"), tmp.path())
            .run(2015)
            .unwrap();
        assert_eq!(summary, YearlySummary::default());
    }
}

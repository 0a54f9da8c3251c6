// src/fetch/acquire.rs
use anyhow::{bail, Result};
use chrono::NaiveDate;
use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};
use tracing::{error, info, instrument, warn};

use super::session::{Fetch, FetchResponse};
use super::urls::UrlResolver;
use crate::asset::AssetClass;
use crate::history::{ArtifactRegistry, ArtifactState};

/// Inclusive calendar range, walked one whole day at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            bail!("date range start {} is after end {}", start, end);
        }
        Ok(Self { start, end })
    }

    /// 1 January of `start_year` through 31 December of `end_year`.
    pub fn years(start_year: i32, end_year: i32) -> Result<Self> {
        let (Some(start), Some(end)) = (
            NaiveDate::from_ymd_opt(start_year, 1, 1),
            NaiveDate::from_ymd_opt(end_year, 12, 31),
        ) else {
            bail!("year out of range: {}..={}", start_year, end_year);
        };
        Self::new(start, end)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn num_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }
}

/// Enforces a minimum gap between consecutive requests. The first request of
/// a run goes out immediately.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    /// Block until `delay` has passed since the last marked request.
    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }
        }
    }

    /// Record that a request attempt just finished, whatever its outcome.
    pub fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}

/// Result of one day of the Acquirer loop. None of these stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayOutcome {
    Downloaded { file_name: String, bytes: usize },
    AlreadyPresent { file_name: String },
    NotFound { file_name: String, status: u16 },
    Failed { file_name: String, cause: String },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AcquireSummary {
    pub days: usize,
    pub downloaded: usize,
    pub already_present: usize,
    pub not_found: usize,
    pub failed: usize,
}

impl AcquireSummary {
    fn record(&mut self, outcome: &DayOutcome) {
        self.days += 1;
        match outcome {
            DayOutcome::Downloaded { .. } => self.downloaded += 1,
            DayOutcome::AlreadyPresent { .. } => self.already_present += 1,
            DayOutcome::NotFound { .. } => self.not_found += 1,
            DayOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Sequential, rate-limited fetch of one daily file per calendar day.
pub struct Acquirer<F: Fetch> {
    fetcher: F,
    resolver: UrlResolver,
    throttle: Throttle,
}

impl<F: Fetch> Acquirer<F> {
    pub fn new(fetcher: F, resolver: UrlResolver, request_delay: Duration) -> Self {
        Self {
            fetcher,
            resolver,
            throttle: Throttle::new(request_delay),
        }
    }

    /// Walk every day of `range` in ascending order, storing new files under
    /// `raw_dir`. Always reaches the end of the range; only a failure to open
    /// `raw_dir` itself is returned as an error.
    #[instrument(level = "info", skip(self, raw_dir), fields(asset = %asset, start = %range.start(), end = %range.end()))]
    pub fn run(
        &mut self,
        range: DateRange,
        asset: AssetClass,
        raw_dir: &Path,
    ) -> Result<AcquireSummary> {
        let mut registry = ArtifactRegistry::scan(raw_dir)?;
        info!(
            days = range.num_days(),
            present = registry.len(),
            "starting download"
        );

        let mut summary = AcquireSummary::default();
        for date in range.days() {
            let outcome = self.fetch_day(date, asset, &mut registry);
            summary.record(&outcome);
        }

        info!(
            days = summary.days,
            downloaded = summary.downloaded,
            already_present = summary.already_present,
            not_found = summary.not_found,
            failed = summary.failed,
            "download completed"
        );
        Ok(summary)
    }

    fn fetch_day(
        &mut self,
        date: NaiveDate,
        asset: AssetClass,
        registry: &mut ArtifactRegistry,
    ) -> DayOutcome {
        let resource = match self.resolver.resolve(date, asset) {
            Ok(r) => r,
            Err(e) => {
                error!(%date, error = %e, "cannot resolve URL");
                return DayOutcome::Failed {
                    file_name: String::new(),
                    cause: e.to_string(),
                };
            }
        };
        let file_name = resource.file_name;

        if registry.state(&file_name) == ArtifactState::Present {
            info!(file = %file_name, "already downloaded, skipping");
            return DayOutcome::AlreadyPresent { file_name };
        }

        self.throttle.wait();
        let response = self.fetcher.get(&resource.url);
        self.throttle.mark();

        match response {
            Ok(FetchResponse::Ok(body)) => match registry.store(&file_name, &body) {
                Ok(_) => {
                    info!(file = %file_name, bytes = body.len(), "downloaded");
                    DayOutcome::Downloaded {
                        file_name,
                        bytes: body.len(),
                    }
                }
                Err(e) => {
                    error!(file = %file_name, error = %e, "failed to persist download");
                    DayOutcome::Failed {
                        file_name,
                        cause: format!("{:#}", e),
                    }
                }
            },
            Ok(FetchResponse::Status(status)) => {
                warn!(url = %resource.url, status, "blocked/no data");
                DayOutcome::NotFound { file_name, status }
            }
            Err(e) => {
                error!(url = %resource.url, error = %e, "fetch failed");
                DayOutcome::Failed {
                    file_name,
                    cause: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use crate::fetch::session::FetchError;
    use std::{cell::RefCell, collections::HashMap, fs};
    use tempfile::tempdir;
    use url::Url;

    /// Scripted stand-in for the archive host. Unscripted URLs answer 404.
    #[derive(Default)]
    struct ScriptedFetch {
        bodies: HashMap<String, Vec<u8>>,
        broken: Vec<String>,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedFetch {
        fn body(mut self, file_name: &str, body: &[u8]) -> Self {
            self.bodies.insert(file_name.to_string(), body.to_vec());
            self
        }

        fn broken(mut self, file_name: &str) -> Self {
            self.broken.push(file_name.to_string());
            self
        }
    }

    fn transport_error(url: &Url) -> FetchError {
        let source = reqwest::blocking::Client::new()
            .get("http://")
            .send()
            .unwrap_err();
        FetchError::Transport {
            url: url.to_string(),
            source,
        }
    }

    impl Fetch for ScriptedFetch {
        fn get(&self, url: &Url) -> Result<FetchResponse, FetchError> {
            let name = url.path_segments().unwrap().last().unwrap().to_string();
            self.calls.borrow_mut().push(name.clone());
            if self.broken.contains(&name) {
                return Err(transport_error(url));
            }
            Ok(match self.bodies.get(&name) {
                Some(b) => FetchResponse::Ok(b.clone()),
                None => FetchResponse::Status(404),
            })
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn acquirer(fetch: &ScriptedFetch) -> Acquirer<&ScriptedFetch> {
        let resolver = UrlResolver::from_config(&RemoteConfig::default()).unwrap();
        Acquirer::new(fetch, resolver, Duration::ZERO)
    }

    #[test]
    fn date_range_is_inclusive_and_validated() {
        let r = DateRange::new(d(2015, 12, 30), d(2016, 1, 2)).unwrap();
        let days: Vec<_> = r.days().collect();
        assert_eq!(days.len(), 4);
        assert_eq!(r.num_days(), 4);
        assert_eq!(days[0], d(2015, 12, 30));
        assert_eq!(days[3], d(2016, 1, 2));

        assert!(DateRange::new(d(2016, 1, 2), d(2015, 12, 30)).is_err());
        assert!(DateRange::years(2016, 2015).is_err());

        let y = DateRange::years(2016, 2016).unwrap();
        assert_eq!(y.num_days(), 366);
        assert_eq!(y.start(), d(2016, 1, 1));
        assert_eq!(y.end(), d(2016, 12, 31));
    }

    #[test]
    fn every_day_is_classified_and_the_run_completes() {
        let tmp = tempdir().unwrap();
        let raw = tmp.path().join("raw");
        fs::create_dir_all(&raw).unwrap();
        fs::write(raw.join("cm02JAN2015bhav.csv.zip"), b"old").unwrap();

        let fetch = ScriptedFetch::default()
            .body("cm01JAN2015bhav.csv.zip", b"zip-1")
            .broken("cm03JAN2015bhav.csv.zip")
            .body("cm05JAN2015bhav.csv.zip", b"zip-5");

        let range = DateRange::new(d(2015, 1, 1), d(2015, 1, 5)).unwrap();
        let summary = acquirer(&fetch)
            .run(range, AssetClass::Equity, &raw)
            .unwrap();

        assert_eq!(
            summary,
            AcquireSummary {
                days: 5,
                downloaded: 2,
                already_present: 1,
                not_found: 1,
                failed: 1,
            }
        );

        // pre-existing file is neither fetched nor touched
        assert_eq!(fs::read(raw.join("cm02JAN2015bhav.csv.zip")).unwrap(), b"old");
        assert_eq!(
            *fetch.calls.borrow(),
            vec![
                "cm01JAN2015bhav.csv.zip",
                "cm03JAN2015bhav.csv.zip",
                "cm04JAN2015bhav.csv.zip",
                "cm05JAN2015bhav.csv.zip",
            ]
        );

        assert_eq!(fs::read(raw.join("cm01JAN2015bhav.csv.zip")).unwrap(), b"zip-1");
        assert_eq!(fs::read(raw.join("cm05JAN2015bhav.csv.zip")).unwrap(), b"zip-5");
        assert!(!raw.join("cm03JAN2015bhav.csv.zip").exists());
        assert!(!raw.join("cm04JAN2015bhav.csv.zip").exists());
    }

    #[test]
    fn rerun_skips_everything_already_downloaded() {
        let tmp = tempdir().unwrap();
        let raw = tmp.path().join("raw/index");
        let fetch = ScriptedFetch::default()
            .body("ind_close_all_01012015.csv", b"a")
            .body("ind_close_all_02012015.csv", b"b");
        let range = DateRange::new(d(2015, 1, 1), d(2015, 1, 2)).unwrap();

        let first = acquirer(&fetch).run(range, AssetClass::Index, &raw).unwrap();
        assert_eq!(first.downloaded, 2);

        let second = acquirer(&fetch).run(range, AssetClass::Index, &raw).unwrap();
        assert_eq!(second.already_present, 2);
        assert_eq!(second.downloaded, 0);
        assert_eq!(fetch.calls.borrow().len(), 2);
    }

    #[test]
    fn throttle_does_not_delay_the_first_request() {
        let mut t = Throttle::new(Duration::from_millis(40));
        let start = Instant::now();
        t.wait();
        assert!(start.elapsed() < Duration::from_millis(40));

        t.mark();
        let start = Instant::now();
        t.wait();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}

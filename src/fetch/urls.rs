// src/fetch/urls.rs
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use url::Url;

use crate::asset::AssetClass;
use crate::config::RemoteConfig;

/// Naming scheme the equity archive used for a given year. The set is closed:
/// the archive switched once, at the cutover year.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EquityScheme {
    /// `<base>/<YYYY>/<MON>/cm<DD><MON><YYYY>bhav.csv.zip`
    Legacy,
    /// `<base>/BhavCopy_NSE_CM_0_0_0_<YYYYMMDD>_F_0000.csv.zip`
    Current,
}

impl EquityScheme {
    pub fn for_year(year: i32, cutover_year: i32) -> Self {
        if year < cutover_year {
            EquityScheme::Legacy
        } else {
            EquityScheme::Current
        }
    }
}

/// A daily file on the archive host and the canonical name it is stored under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteResource {
    pub url: Url,
    pub file_name: String,
}

pub fn legacy_equity_file_name(date: NaiveDate) -> String {
    format!(
        "cm{:02}{}{}bhav.csv.zip",
        date.day(),
        month_upper(date),
        date.year()
    )
}

pub fn current_equity_file_name(date: NaiveDate) -> String {
    format!(
        "BhavCopy_NSE_CM_0_0_0_{}_F_0000.csv.zip",
        date.format("%Y%m%d")
    )
}

pub fn index_file_name(date: NaiveDate) -> String {
    format!("ind_close_all_{}.csv", date.format("%d%m%Y"))
}

fn month_upper(date: NaiveDate) -> String {
    date.format("%b").to_string().to_uppercase()
}

/// Maps a calendar date to the archive URL and local filename for a stream.
#[derive(Clone, Debug)]
pub struct UrlResolver {
    equity_legacy_base: Url,
    equity_current_base: Url,
    index_base: Url,
    cutover_year: i32,
}

impl UrlResolver {
    pub fn new(
        equity_legacy_base: &str,
        equity_current_base: &str,
        index_base: &str,
        cutover_year: i32,
    ) -> Result<Self> {
        Ok(Self {
            equity_legacy_base: parse_base(equity_legacy_base)?,
            equity_current_base: parse_base(equity_current_base)?,
            index_base: parse_base(index_base)?,
            cutover_year,
        })
    }

    pub fn from_config(remote: &RemoteConfig) -> Result<Self> {
        Self::new(
            &remote.equity_legacy_base,
            &remote.equity_current_base,
            &remote.index_base,
            remote.cutover_year,
        )
    }

    pub fn cutover_year(&self) -> i32 {
        self.cutover_year
    }

    pub fn equity_scheme(&self, date: NaiveDate) -> EquityScheme {
        EquityScheme::for_year(date.year(), self.cutover_year)
    }

    pub fn resolve(&self, date: NaiveDate, asset: AssetClass) -> Result<RemoteResource> {
        let (base, rel, file_name) = match asset {
            AssetClass::Equity => match self.equity_scheme(date) {
                EquityScheme::Legacy => {
                    let name = legacy_equity_file_name(date);
                    let rel = format!("{}/{}/{}", date.year(), month_upper(date), name);
                    (&self.equity_legacy_base, rel, name)
                }
                EquityScheme::Current => {
                    let name = current_equity_file_name(date);
                    (&self.equity_current_base, name.clone(), name)
                }
            },
            AssetClass::Index => {
                let name = index_file_name(date);
                (&self.index_base, name.clone(), name)
            }
        };
        let url = base
            .join(&rel)
            .with_context(|| format!("joining {} onto {}", rel, base))?;
        Ok(RemoteResource { url, file_name })
    }
}

/// Parse a base URL, forcing a trailing slash so `join` appends instead of
/// replacing the last path segment.
fn parse_base(raw: &str) -> Result<Url> {
    let mut s = raw.trim().to_string();
    if !s.ends_with('/') {
        s.push('/');
    }
    let url = Url::parse(&s).with_context(|| format!("parsing base URL {}", raw))?;
    if url.cannot_be_a_base() {
        anyhow::bail!("{} cannot be used as a base URL", raw);
    }
    Ok(url)
}

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::RemoteConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading body from {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// What came back for one GET. Anything but 200 is reported by status only;
/// the body of a refusal is never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    Ok(Vec<u8>),
    Status(u16),
}

/// The one network operation the Acquirer needs.
pub trait Fetch {
    fn get(&self, url: &Url) -> Result<FetchResponse, FetchError>;
}

impl<T: Fetch + ?Sized> Fetch for &T {
    fn get(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        (**self).get(url)
    }
}

/// Blocking HTTP client carrying browser-like headers and the archive host's
/// session cookies.
pub struct Session {
    client: Client,
    home_url: String,
}

impl Session {
    /// Build the client without touching the network.
    pub fn build(remote: &RemoteConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&remote.user_agent).context("invalid user_agent header")?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&remote.home_url).context("invalid referer header")?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&remote.accept_language)
                .context("invalid accept_language header")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        let client = Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .timeout(remote.timeout())
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            home_url: remote.home_url.clone(),
        })
    }

    /// Build the client and warm its cookie jar against the home page.
    pub fn connect(remote: &RemoteConfig) -> Result<Self> {
        let session = Self::build(remote)?;
        session.prime();
        Ok(session)
    }

    /// One GET to the home page so later requests carry its cookies. A failed
    /// prime is only logged; per-day fetches proceed and fail on their own.
    #[instrument(level = "info", skip(self), fields(home = %self.home_url))]
    pub fn prime(&self) {
        let start = Instant::now();
        match self.client.get(&self.home_url).send() {
            Ok(resp) => info!(
                status = resp.status().as_u16(),
                elapsed = ?start.elapsed(),
                "session primed"
            ),
            Err(e) => warn!(error = %e, "session prime failed, continuing without cookies"),
        }
    }
}

impl Fetch for Session {
    fn get(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let resp = self
            .client
            .get(url.as_str())
            .send()
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Ok(FetchResponse::Status(status.as_u16()));
        }

        let bytes = resp.bytes().map_err(|source| FetchError::Body {
            url: url.to_string(),
            source,
        })?;
        Ok(FetchResponse::Ok(bytes.to_vec()))
    }
}

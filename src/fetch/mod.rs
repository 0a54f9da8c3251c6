// src/fetch/mod.rs

pub mod acquire;
pub mod session;
pub mod urls;

pub use acquire::{AcquireSummary, Acquirer, DateRange, DayOutcome};
pub use session::{Fetch, FetchError, FetchResponse, Session};
pub use urls::{EquityScheme, RemoteResource, UrlResolver};

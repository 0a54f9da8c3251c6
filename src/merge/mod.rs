// src/merge/mod.rs
pub mod master;
pub mod yearly;

pub use master::{MasterAggregator, MasterSummary};
pub use yearly::{YearlyAggregator, YearlySummary};

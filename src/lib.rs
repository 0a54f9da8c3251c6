// src/lib.rs
pub mod asset;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod history;
pub mod logging;
pub mod merge;
pub mod process;

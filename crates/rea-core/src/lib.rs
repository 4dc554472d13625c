//! Core domain + engine for the property alert bot.
//!
//! This crate is intentionally framework-agnostic. Flatfox / Telegram live
//! behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod matching;
pub mod messaging;
pub mod ports;
pub mod scheduler;
pub mod search;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{Error, Result};

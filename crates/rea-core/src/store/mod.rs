//! File-backed implementations of the alert store and notification ledger.

pub mod alerts;
pub mod ledger;

pub use alerts::JsonAlertStore;
pub use ledger::JsonLedger;

use crate::Error;

fn store_err(what: &str, e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(format!("{what}: {e}"))
}

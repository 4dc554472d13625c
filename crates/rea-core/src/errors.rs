use crate::domain::AlertId;

/// Core error type.
///
/// Adapter crates map their specific errors into this type so the engine can
/// decide per variant whether to skip a shape, skip a pair or abort a cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transient network/service failure (including timeouts).
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The source answered with data we cannot interpret.
    #[error("source protocol error: {0}")]
    SourceProtocol(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("invalid alert: {0}")]
    InvalidAlert(String),

    #[error("alert {0} not found")]
    AlertNotFound(AlertId),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

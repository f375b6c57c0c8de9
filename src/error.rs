use thiserror::Error;

/// Error type for scan construction, row assembly and push-down filter handling.
#[derive(Error, Debug)]
pub enum ScanError {
    /// A row lacks cells where at least one is required, or its payload is inconsistent.
    #[error("Malformed row: {0}")]
    MalformedRow(String),

    /// The store returned data outside of the requested scan.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A row was appended to a span belonging to a different time series.
    #[error("Series key mismatch ({reason}): span key={expected}, row key={actual}")]
    SeriesKeyMismatch {
        reason: &'static str,
        expected: String,
        actual: String,
    },

    /// A tag name id is both a fixed tag constraint and a group-by dimension.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid filter definition: {0}")]
    InvalidFilter(String),

    /// The underlying key-value store failed. Terminal for the scan.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

impl<T> From<std::sync::PoisonError<T>> for ScanError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ScanError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}

/// Renders a key as lowercase hex for error messages and events.
pub(crate) fn hex(bytes: &[u8]) -> String {
    ::hex::encode(bytes)
}

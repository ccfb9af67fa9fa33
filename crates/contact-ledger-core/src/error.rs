//! Error taxonomy shared by the ingestion and export paths.
//!
//! Every fallible core operation returns [`Result`]. Variants map one-to-one
//! onto how the caller must react:
//!
//! | Variant | Severity | Surface |
//! |---------|----------|---------|
//! | [`UnsupportedFormat`](LedgerError::UnsupportedFormat) | fatal, user-visible | 415 |
//! | [`SnapshotNotFound`](LedgerError::SnapshotNotFound) | fatal, user-visible | 404 |
//! | [`ReportNotFound`](LedgerError::ReportNotFound) | fatal, user-visible | 404 |
//! | [`InvalidRequest`](LedgerError::InvalidRequest) | fatal, user-visible | 400 |
//! | [`Parse`](LedgerError::Parse) | fatal, user-visible | 400 |
//! | [`Storage`](LedgerError::Storage) | fatal, aborts the call | 500 |
//!
//! Report, snapshot and activity persistence failures never become a
//! `LedgerError` for the caller; they are logged where they happen.

use thiserror::Error;

/// Convenience result type used throughout the core crate.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The uploaded file is neither `.csv` nor `.xlsx`.
    #[error("unsupported file format: {0}. Please upload CSV or XLSX")]
    UnsupportedFormat(String),

    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("upload report not found: {0}")]
    ReportNotFound(String),

    /// Bad filter field, bad page window, unknown export field.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The input file could not be decoded as the format its name claims.
    #[error("parse error: {0}")]
    Parse(String),

    /// The store rejected or failed an operation. For bulk upserts nothing
    /// was applied.
    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn invalid<T: Into<String>>(message: T) -> Self {
        LedgerError::InvalidRequest(message.into())
    }

    pub fn parse<T: Into<String>>(message: T) -> Self {
        LedgerError::Parse(message.into())
    }

    pub fn storage<T: std::fmt::Display>(err: T) -> Self {
        LedgerError::Storage(err.to_string())
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::UnsupportedFormat(_) => "unsupported_format",
            LedgerError::SnapshotNotFound(_) | LedgerError::ReportNotFound(_) => "not_found",
            LedgerError::InvalidRequest(_) => "bad_request",
            LedgerError::Parse(_) => "parse_error",
            LedgerError::Storage(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage(format!("serialization: {}", err))
    }
}

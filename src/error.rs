use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum GiltError {
    #[error("invalid report date {0:?} (expected DD/MM/YYYY)")]
    InvalidReportDate(String),

    #[error("invalid ISIN cell: {0:?}")]
    InvalidIsin(String),

    #[error("invalid coupon rate: {0:?}")]
    InvalidCoupon(String),

    #[error("invalid maturity date: {0:?}")]
    InvalidMaturity(String),

    #[error("invalid amount outstanding: {0:?}")]
    InvalidAmount(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("report page returned status {status}: {message}")]
    PageStatus { status: u16, message: String },

    #[error("cookie overlay is present but carries no accept control")]
    ConsentControlNotFound,

    #[error("export control labelled {0:?} not found on report page")]
    ExportControlNotFound(String),

    #[error("download did not complete within {0} seconds")]
    DownloadTimeout(u64),

    #[error("downloaded file is not a spreadsheet: {0}")]
    UnsupportedDownload(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("unsupported spreadsheet: {0}")]
    UnsupportedFormat(String),

    #[error("no header row with recognisable column labels found")]
    HeaderNotFound,

    #[error("header row is missing a {0} column")]
    MissingColumn(&'static str),

    #[error("row {row}: cannot parse {column} value {value:?}")]
    ParseFailure {
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

//! Error types for the ingestion engine
//!
//! Two layers of failure exist and they are kept apart on purpose:
//!
//! - [`EntryError`] describes why a single log line did not become a
//!   [`UsageEvent`](crate::models::UsageEvent). These never leave the parser;
//!   they are tallied into [`ParseStats`](crate::parser::ParseStats).
//! - [`IngestError`] is what the scanner and the pipeline hand back to callers.

use std::path::PathBuf;
use thiserror::Error;

/// Why a single JSONL line was rejected.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("record has no message.usage with numeric input_tokens/output_tokens")]
    MissingUsage,
    #[error("invalid or missing timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("synthetic model marker: {0}")]
    SyntheticModel(String),
    #[error("timestamp predates {min_year}: {timestamp}")]
    StaleEntry { timestamp: String, min_year: i32 },
    #[error("non-usage record of kind {kind:?}")]
    NonUsageRecord { kind: String },
}

/// How a rejected line is accounted for in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Corruption worth reporting; counted as a parse error.
    Diagnostic,
    /// Well-formed but unusable; counted separately from parse errors.
    Dropped,
    /// Expected heterogeneity in the log stream; not counted at all.
    Ignored,
}

impl EntryError {
    pub fn disposition(&self) -> Disposition {
        match self {
            EntryError::MalformedJson(_) | EntryError::MissingUsage => Disposition::Diagnostic,
            EntryError::InvalidTimestamp(_)
            | EntryError::SyntheticModel(_)
            | EntryError::StaleEntry { .. } => Disposition::Dropped,
            EntryError::NonUsageRecord { .. } => Disposition::Ignored,
        }
    }
}

/// Failures surfaced by directory scanning and the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("data root is missing or unreadable: {path}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("none of the {failed} log files could be processed")]
    AllFilesFailed { failed: usize },
    #[error("ingestion cancelled")]
    Cancelled,
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

//! Error types for varbank
//!
//! One enum covers the whole crate: annotation loading, alignment handling,
//! profile grammar violations, cache/store corruption checks and the
//! per-genome deadline. Corruption-class errors (`CacheCollision`,
//! `DataConsistency`) are never downgraded or retried; callers surface them
//! immediately.

use std::fmt;
use thiserror::Error;

/// All errors produced by varbank.
#[derive(Debug, Error)]
pub enum VarbankError {
    /// Malformed CDS metadata in the annotation source. Aborts the load.
    #[error("annotation error: {msg}")]
    Annotation { msg: String },

    /// Aligned sequence pair is unusable (e.g. unequal lengths).
    #[error("alignment error: {msg}")]
    Alignment { msg: String },

    /// The external aligner could not be run or returned garbage.
    #[error("aligner failed: {msg}")]
    AlignerFailed { msg: String },

    /// One or more query/profile tokens failed grammar validation.
    /// All offending tokens are reported at once.
    #[error("invalid variant expression(s): {}", tokens.join(", "))]
    InvalidProfile { tokens: Vec<String> },

    /// A date filter value is not a calendar date.
    #[error("input error: invalid date '{value}' (expected YYYY-MM-DD)")]
    InvalidDate { value: String },

    /// Two different byte sequences mapped to the same content hash.
    #[error("cache error: sequence hash collision for hash '{hash}'")]
    CacheCollision { hash: String },

    /// A cache file exists but its format version is not ours.
    #[error("cache error: {path} has format version {found}, expected {expected}")]
    CacheVersion {
        path: String,
        found: u32,
        expected: u32,
    },

    /// A stored variant disagrees with the live reference sequence, or a
    /// restored genome differs from the imported one.
    #[error("data error: data inconsistency found for '{accession}' ({msg})")]
    DataConsistency { accession: String, msg: String },

    /// Per-genome wall-clock deadline exceeded. Recoverable: the genome is
    /// skipped and the batch continues.
    #[error("timeout: processing of '{accession}' exceeded {seconds}s")]
    Timeout { accession: String, seconds: u64 },

    /// Accession not present in the store.
    #[error("error: {accession} not found")]
    UnknownAccession { accession: String },

    /// Configuration file could not be read or parsed.
    #[error("config error: {msg}")]
    Config { msg: String },

    /// File IO error.
    #[error("IO error: {msg}")]
    Io { msg: String },

    /// SQLite error from the variant store.
    #[error("store error: {msg}")]
    Store { msg: String },

    /// JSON (de)serialization error.
    #[error("JSON error: {msg}")]
    Json { msg: String },
}

impl VarbankError {
    /// Create an annotation error.
    pub fn annotation(msg: impl Into<String>) -> Self {
        VarbankError::Annotation { msg: msg.into() }
    }

    /// Create an alignment error.
    pub fn alignment(msg: impl Into<String>) -> Self {
        VarbankError::Alignment { msg: msg.into() }
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        VarbankError::Store { msg: msg.into() }
    }

    /// Create a data-consistency error with a free-form report.
    pub fn inconsistency(accession: impl Into<String>, msg: impl Into<String>) -> Self {
        VarbankError::DataConsistency {
            accession: accession.into(),
            msg: msg.into(),
        }
    }

    /// Create a data-consistency error with the standard site report.
    pub fn inconsistent_site(
        accession: impl Into<String>,
        expected: &str,
        position: i64,
        found: &str,
    ) -> Self {
        VarbankError::DataConsistency {
            accession: accession.into(),
            msg: format!(
                "{} expected at position {} of the reference sequence, got {}",
                expected,
                position + 1,
                found
            ),
        }
    }

    /// True for errors that indicate store or cache corruption rather than
    /// bad input. These must never be swallowed.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            VarbankError::CacheCollision { .. } | VarbankError::DataConsistency { .. }
        )
    }

    /// True for errors that are recoverable within a batch (the affected
    /// genome is skipped, the batch continues).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VarbankError::Timeout { .. })
    }
}

impl From<std::io::Error> for VarbankError {
    fn from(err: std::io::Error) -> Self {
        VarbankError::Io {
            msg: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for VarbankError {
    fn from(err: rusqlite::Error) -> Self {
        VarbankError::Store {
            msg: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for VarbankError {
    fn from(err: serde_json::Error) -> Self {
        VarbankError::Json {
            msg: err.to_string(),
        }
    }
}

/// Outcome of processing a single genome within a batch: hard failures stop
/// the batch, everything else is tallied and the batch moves on.
#[derive(Debug)]
pub enum GenomeOutcome {
    /// Genome processed and stored.
    Imported,
    /// Genome skipped (deadline exceeded), with the reason kept for the log.
    Skipped(VarbankError),
    /// Genome could not be processed or failed verification; it is not in
    /// the store.
    Failed(VarbankError),
}

impl fmt::Display for GenomeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenomeOutcome::Imported => write!(f, "imported"),
            GenomeOutcome::Skipped(e) => write!(f, "skipped ({})", e),
            GenomeOutcome::Failed(e) => write!(f, "failed ({})", e),
        }
    }
}

//! Error types for the markup-gateway library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`MarkupError`] is **fatal** for the step that raised it. The server
//!   could not be reached or reported a failure, its answer made no sense,
//!   or the retrieved archive is unreadable. Returned as
//!   `Err(MarkupError)` from the client, extractor and publisher, and folded
//!   into a [`crate::orchestrator::JobReport`] at the orchestration boundary.
//!
//! * [`ExtractWarning`] is **non-fatal**. Part of an extraction went wrong
//!   (a nested `html.zip` could not be unpacked) but the outer archive is
//!   already in place. Stored on [`crate::pipeline::extract::Extraction`] so
//!   the caller can report it without losing the files that did land.
//!
//! Access denial is not an error. It is a normal outcome of
//! [`crate::access::AccessGate`], see [`crate::access::AccessDecision`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the markup-gateway library.
#[derive(Debug, Error)]
pub enum MarkupError {
    // ── Conversion server errors ──────────────────────────────────────────
    /// The conversion server could not be reached (DNS, connect, reset,
    /// request timeout). Retryable by submitting again.
    #[error("Could not reach the markup server at '{url}': {reason}")]
    Transport { url: String, reason: String },

    /// The conversion server answered but reported an application error.
    /// Not retryable without a new source file.
    #[error("Markup server error{}: {message}", code.map(|c| format!(" {c}")).unwrap_or_default())]
    Server { code: Option<i64>, message: String },

    /// The server answered with a malformed job id or an unexpected payload.
    #[error("Unexpected response from markup server: {detail}")]
    Protocol { detail: String },

    /// Polling exhausted its attempts without a terminal status.
    #[error("Job {job_id} did not finish after {attempts} status checks")]
    PollTimeout { job_id: String, attempts: u32 },

    // ── Archive errors ────────────────────────────────────────────────────
    /// The zip archive could not be opened or failed its consistency check.
    #[error("Archive '{path}' is corrupt: {detail}")]
    CorruptArchive { path: PathBuf, detail: String },

    // ── Host state errors ─────────────────────────────────────────────────
    /// The article's supplementary archive has no file to convert.
    #[error("Article {article} has no document attached to its markup archive")]
    NoSourceFile { article: u64 },

    /// A host store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a local file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarkupError {
    /// Shorthand for wrapping an `io::Error` with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MarkupError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a fresh submission of the same source may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarkupError::Transport { .. } | MarkupError::PollTimeout { .. }
        )
    }
}

/// A non-fatal problem found while extracting an archive.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractWarning {
    /// The nested html bundle could not be unpacked.
    #[error("Nested archive '{name}' could not be extracted: {detail}")]
    NestedArchive { name: String, detail: String },

    /// An entry was skipped because its path would escape the destination.
    #[error("Skipped unsafe archive entry '{name}'")]
    UnsafeEntry { name: String },
}

//! Failure taxonomy shared by the pipeline components.
//!
//! Plumbing (database, filesystem, config) stays on `anyhow`; anything that decides whether a
//! caller retries, gives up, or asks the user for something is a [`PipelineError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fatal to the triggering call. The caller must re-request the permission before retrying.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Network or backend hiccup; retried with backoff up to the policy cap.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Input that can never succeed (empty or unreadable source file, bad payload).
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Retry budget exhausted.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Terminal { attempts: u32, last_error: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn transient(msg: impl Into<String>) -> Self {
        PipelineError::Transient(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        PipelineError::Malformed(msg.into())
    }

    /// Default retryable predicate: only transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Transient(err.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

//! Error taxonomy shared by the expansion engine, plan mutator and ledger.
//!
//! Ownership problems are not errors here: batch operations report them per
//! item (see [`crate::mutator::RejectionReason`]) and carry on. An idempotent
//! skip is not an error either; it is a successful result with zero records.

use std::future::Future;
use std::time::Duration;

/// Errors returned by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad input or malformed plan data, detected before anything was written.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{what} not found")]
    NotFound { what: String },

    /// A storage call failed. The unit of work was rolled back and may be
    /// retried as a whole.
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),

    /// Plan data violates a structural invariant. Not transient.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("operation exceeded its {0:?} deadline")]
    Timeout(Duration),

    /// A plan week rewrite failed during retraction. Nothing was committed;
    /// `unpersisted_weeks` lists the weeks a retry has to rewrite.
    #[error("retraction aborted, weeks {unpersisted_weeks:?} not persisted: {source:#}")]
    PartialRetraction {
        unpersisted_weeks: Vec<i32>,
        source: anyhow::Error,
    },
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Timeout(_) | Self::PartialRetraction { .. }
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(anyhow::Error::new(err))
    }
}

/// Run `fut` under a deadline. On expiry the future is dropped, which rolls
/// back any transaction it holds.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(deadline)),
    }
}

//! Pipeline error types
//!
//! Four families of failure, with different blast radii:
//!
//! - validation errors reject a submission synchronously, creating no state
//! - infrastructure errors leave batch/chunk state untouched so the whole
//!   operation can be retried (event deliveries stay unacknowledged)
//! - terminal parse errors fail the batch for operator intervention
//! - per-chunk application errors fail that chunk only; sibling chunks and
//!   the batch keep going

use thiserror::Error;

use crate::events::EventLogError;

/// Result alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors raised while the chunker, chunk workers, or reconciler run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Object storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),
}

/// Errors surfaced to the caller of the intake boundary.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Payload must be a non-empty array of catalog records")]
    EmptyPayload,

    #[error("Payload is not a well-formed catalog record array: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("Record {index} is missing its registry code")]
    MissingRegistryCode { index: usize },

    #[error("Payload mixes registry codes: {first} and {other}")]
    MixedRegistryCodes { first: String, other: String },

    #[error("Pharmacy not found: {0}")]
    PharmacyNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Object storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),
}

impl IntakeError {
    /// Whether this error is a rejection of the submission itself, as
    /// opposed to an infrastructure failure worth retrying.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IntakeError::EmptyPayload
                | IntakeError::MalformedPayload(_)
                | IntakeError::MissingRegistryCode { .. }
                | IntakeError::MixedRegistryCodes { .. }
                | IntakeError::PharmacyNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intake_error_validation_classification() {
        assert!(IntakeError::EmptyPayload.is_validation());
        assert!(IntakeError::PharmacyNotFound("123".to_string()).is_validation());
        assert!(IntakeError::MixedRegistryCodes {
            first: "1".to_string(),
            other: "2".to_string(),
        }
        .is_validation());
        assert!(!IntakeError::Database(sqlx::Error::PoolClosed).is_validation());
    }
}

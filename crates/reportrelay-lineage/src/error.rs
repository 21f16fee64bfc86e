use thiserror::Error;
use uuid::Uuid;

/// Error types for lineage operations
#[derive(Debug, Error)]
pub enum LineageError {
    #[error("Report not found: {0}")]
    ReportNotFound(Uuid),

    #[error("Report already exists: {0}")]
    DuplicateReport(Uuid),

    #[error("Action {action} already recorded children for parent {parent}")]
    DuplicateAction { parent: Uuid, action: String },

    #[error("Fan-out mismatch for parent {parent}: expected {expected} children, found {actual}")]
    FanOutMismatch {
        parent: Uuid,
        expected: usize,
        actual: usize,
    },

    #[error("Report invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LineageError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Infrastructure faults are retryable through queue redelivery;
    /// everything else indicates a logic or data bug and is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transaction(_) | Self::Storage(_))
    }
}

/// Convenience result type for lineage operations
pub type Result<T> = std::result::Result<T, LineageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LineageError::storage("connection reset").is_retryable());
        assert!(LineageError::transaction("commit failed").is_retryable());
        assert!(!LineageError::ReportNotFound(Uuid::new_v4()).is_retryable());
        assert!(!LineageError::invariant("bad").is_retryable());
    }

    #[test]
    fn test_fan_out_mismatch_message() {
        let parent = Uuid::new_v4();
        let err = LineageError::FanOutMismatch {
            parent,
            expected: 3,
            actual: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("found 2"));
    }
}

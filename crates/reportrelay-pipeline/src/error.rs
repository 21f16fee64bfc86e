use thiserror::Error;
use uuid::Uuid;

use reportrelay_config::ConfigError;
use reportrelay_core::CoreError;
use reportrelay_filter::FilterError;
use reportrelay_lineage::LineageError;

/// Error types for pipeline stage processing
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lineage(#[from] LineageError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Malformed queue message: {0}")]
    MalformedMessage(String),

    #[error("Report not found: {0}")]
    ReportNotFound(Uuid),

    #[error("Stage not handled by this dispatcher: {0}")]
    UnsupportedStage(String),
}

impl PipelineError {
    pub fn blob(msg: impl Into<String>) -> Self {
        Self::Blob(msg.into())
    }

    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Whether queue redelivery can help.
    ///
    /// Collaborator faults (blob, queue, lineage storage) are transient and
    /// retryable. A missing report row is retryable too: the parent
    /// transaction commits before its successor is enqueued, so the row will
    /// appear. Digest mismatches, malformed messages, and expression errors
    /// are not — redelivering corrupt or misconfigured input cannot succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Blob(_) | Self::Queue(_) | Self::ReportNotFound(_) => true,
            Self::Lineage(e) => e.is_retryable(),
            Self::Filter(FilterError::Lookup(_)) => true,
            Self::Core(_) | Self::Config(_) | Self::Filter(_) => false,
            Self::MalformedMessage(_) | Self::UnsupportedStage(_) => false,
        }
    }
}

/// Convenience result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

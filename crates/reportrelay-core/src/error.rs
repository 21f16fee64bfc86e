use thiserror::Error;

/// Core error types for reportrelay operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Failed to decode {format} content: {message}")]
    Decode { format: String, message: String },

    #[error("Failed to encode bundle to {format}: {message}")]
    Encode { format: String, message: String },

    #[error("Digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("Unknown report format: {0}")]
    UnknownFormat(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("UUID error: {0}")]
    UuidError(#[from] uuid::Error),
}

impl CoreError {
    /// Create a new Decode error
    pub fn decode(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Create a new Encode error
    pub fn encode(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            format: format.into(),
            message: message.into(),
        }
    }

    /// Create a new DigestMismatch error
    pub fn digest_mismatch(expected: impl Into<String>, computed: impl Into<String>) -> Self {
        Self::DigestMismatch {
            expected: expected.into(),
            computed: computed.into(),
        }
    }

    /// Create a new InvalidBundle error
    pub fn invalid_bundle(message: impl Into<String>) -> Self {
        Self::InvalidBundle(message.into())
    }

    /// A digest mismatch means corrupted data, never a transient fault;
    /// everything else here is a data/content problem tied to one item.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::DigestMismatch { .. })
    }

    /// Item-scoped content problems that must not abort sibling items.
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::InvalidBundle(_) | Self::JsonError(_)
        )
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

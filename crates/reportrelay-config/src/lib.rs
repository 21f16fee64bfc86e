//! Organization, sender, and receiver settings.
//!
//! Settings are loaded once into an immutable [`SettingsSnapshot`] and
//! injected into each stage processor at construction. There is no shared
//! mutable configuration state; a new snapshot means a new processor.

pub mod settings;

pub use settings::{
    CustomerStatus, Organization, Receiver, ReceiverRef, Sender, SettingsSnapshot,
};

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown receiver: {0}")]
    UnknownReceiver(String),

    #[error("Unknown sender: {0}")]
    UnknownSender(String),
}

impl ConfigError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

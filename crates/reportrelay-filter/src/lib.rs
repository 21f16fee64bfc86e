//! The filter chain engine.
//!
//! Given a bundle, a topic, and a receiver's filter configuration, decides
//! whether the receiver should get the report at all (report-level filters,
//! evaluated in a fixed order with short-circuit on first failure) and which
//! observations must be pruned from the bundle before sending (item-level
//! condition filters).

pub mod engine;
pub mod eval;
pub mod result;

pub use engine::{ConditionOutcome, FilterChainEngine, FilterOutcome};
pub use eval::{ConditionLookup, FilterEvaluator, SimpleEvaluator, TableConditionLookup};
pub use result::{FilterResult, FilterType};

use thiserror::Error;

/// Error types for filter evaluation
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid filter expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("Evaluation failed for '{expression}': {message}")]
    Evaluation { expression: String, message: String },

    #[error("Condition lookup failed: {0}")]
    Lookup(String),
}

impl FilterError {
    pub fn invalid_expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn evaluation(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup(message.into())
    }
}

/// Convenience result type for filter operations
pub type Result<T> = std::result::Result<T, FilterError>;

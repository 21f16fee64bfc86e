use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Routing domain for a report. Receivers subscribe to exactly one topic;
/// the Router only considers receivers whose topic matches the report's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Full ELR pipeline (lab reports routed to jurisdictions)
    FullElr,
    /// ELR feed for the ELIMS integration
    ElrElims,
    /// Test topic, never routed to production receivers
    Test,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::FullElr => "full-elr",
            Topic::ElrElims => "elr-elims",
            Topic::Test => "test",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "full-elr" => Ok(Topic::FullElr),
            "elr-elims" => Ok(Topic::ElrElims),
            "test" => Ok(Topic::Test),
            other => Err(CoreError::UnknownTopic(other.to_string())),
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

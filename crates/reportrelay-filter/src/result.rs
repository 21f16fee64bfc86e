use serde::{Deserialize, Serialize};

/// The fixed enumeration of filter kinds, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterType {
    JurisdictionalFilter,
    QualityFilter,
    RoutingFilter,
    ProcessingModeFilter,
    ConditionFilter,
    MappedConditionFilter,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::JurisdictionalFilter => "JURISDICTIONAL_FILTER",
            FilterType::QualityFilter => "QUALITY_FILTER",
            FilterType::RoutingFilter => "ROUTING_FILTER",
            FilterType::ProcessingModeFilter => "PROCESSING_MODE_FILTER",
            FilterType::ConditionFilter => "CONDITION_FILTER",
            FilterType::MappedConditionFilter => "MAPPED_CONDITION_FILTER",
        }
    }

    /// Jurisdictional mismatch is routine and high-volume; it terminates the
    /// branch without an action-log entry, unlike every other filter kind.
    pub fn logs_on_failure(&self) -> bool {
        !matches!(self, FilterType::JurisdictionalFilter)
    }

    /// Condition filters operate per observation rather than per report.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            FilterType::ConditionFilter | FilterType::MappedConditionFilter
        )
    }
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one filter stage for one receiver. Persisted to the action
/// log on rejection (unless suppressed) and attached to filter events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    pub filter_type: FilterType,
    /// The expression list that was evaluated (the backing allowed-set
    /// rendering for mapped condition filters).
    pub filter_expressions: Vec<String>,
    /// Receiver full name (`org.receiverName`).
    pub receiver_name: String,
    pub passed: bool,
    /// Reference keys of the observations that failed, for item-level logs.
    pub failing_observation_keys: Vec<String>,
    /// True when this failure must not be written to the action log
    /// (jurisdictional mismatches).
    pub log_suppressed: bool,
}

impl FilterResult {
    pub fn failure(
        filter_type: FilterType,
        filter_expressions: Vec<String>,
        receiver_name: impl Into<String>,
    ) -> Self {
        Self {
            filter_type,
            filter_expressions,
            receiver_name: receiver_name.into(),
            passed: false,
            failing_observation_keys: Vec::new(),
            log_suppressed: !filter_type.logs_on_failure(),
        }
    }

    pub fn with_failing_observations(mut self, keys: Vec<String>) -> Self {
        self.failing_observation_keys = keys;
        self
    }

    /// Human-readable summary for action-log messages.
    pub fn summary(&self) -> String {
        format!(
            "{} for {} failed: [{}]",
            self.filter_type,
            self.receiver_name,
            self.filter_expressions.join(", ")
        )
    }
}

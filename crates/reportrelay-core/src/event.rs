//! Structured pipeline events.
//!
//! Stage processors emit fire-and-forget events at routing and filtering
//! decision points. Events carry a [`BundleDigest`] summary so downstream
//! dashboards never need to re-parse a bundle to answer "what was in it".

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::bundle::Bundle;
use crate::topic::Topic;

/// Event parameter key: the expression list that failed.
pub const PARAM_FAILING_FILTERS: &str = "failingFilters";
/// Event parameter key: which filter kind failed.
pub const PARAM_FILTER_TYPE: &str = "filterType";
/// Event parameter key: enrichment schemas applied at the enrichment stage.
pub const PARAM_ENRICHMENTS: &str = "enrichments";
/// Event parameter key: receiver the decision applied to.
pub const PARAM_RECEIVER_NAME: &str = "receiverName";

/// Names of emitted pipeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineEventName {
    /// A filter rejected a report or items within it for one receiver.
    ItemFilterFailed,
    /// An enrichment or translation transformed a report.
    ItemTransformed,
    /// The router accepted a report for one receiver.
    ItemRouted,
    /// The converter failed to decode one item of a batch.
    ItemFailedValidation,
}

impl PipelineEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineEventName::ItemFilterFailed => "ITEM_FILTER_FAILED",
            PipelineEventName::ItemTransformed => "ITEM_TRANSFORMED",
            PipelineEventName::ItemRouted => "ITEM_ROUTED",
            PipelineEventName::ItemFailedValidation => "ITEM_FAILED_VALIDATION",
        }
    }
}

impl std::fmt::Display for PipelineEventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compact summary of a bundle's clinically relevant content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleDigest {
    /// Message identifier from the bundle, when present.
    pub message_id: Option<String>,
    /// Primary code of each observation, in bundle order.
    pub observation_codes: Vec<String>,
    /// Patient jurisdiction (address state).
    pub patient_state: Option<String>,
    /// Ordering facility name.
    pub ordering_facility: Option<String>,
}

impl BundleDigest {
    pub fn from_bundle(bundle: &Bundle) -> Self {
        Self {
            message_id: bundle.identifier.clone(),
            observation_codes: bundle.observation_codes(),
            patient_state: bundle.patient_state(),
            ordering_facility: bundle.ordering_facility_name(),
        }
    }
}

/// One structured pipeline event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub name: PipelineEventName,
    pub report_id: Uuid,
    pub parent_report_id: Option<Uuid>,
    pub topic: Option<Topic>,
    pub bundle_digest: Option<BundleDigest>,
    pub params: Map<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl PipelineEvent {
    pub fn new(name: PipelineEventName, report_id: Uuid) -> Self {
        Self {
            name,
            report_id,
            parent_report_id: None,
            topic: None,
            bundle_digest: None,
            params: Map::new(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_parent(mut self, parent_report_id: Uuid) -> Self {
        self.parent_report_id = Some(parent_report_id);
        self
    }

    pub fn with_topic(mut self, topic: Topic) -> Self {
        self.topic = Some(topic);
        self
    }

    pub fn with_bundle(mut self, bundle: &Bundle) -> Self {
        self.bundle_digest = Some(BundleDigest::from_bundle(bundle));
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Fire-and-forget sink for pipeline events. Implementations must never
/// fail the calling stage; delivery problems are their own concern.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// Default sink that logs events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: PipelineEvent) {
        // Rendered outside the macro; `tracing` shadows `Value` inside it.
        let params = Value::Object(event.params.clone());
        tracing::info!(
            event = event.name.as_str(),
            report_id = %event.report_id,
            topic = event.topic.map(|t| t.as_str()),
            params = %params,
            "pipeline event"
        );
    }
}

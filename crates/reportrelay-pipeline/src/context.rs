//! Shared collaborator handles for stage processors.

use std::sync::Arc;

use reportrelay_config::SettingsSnapshot;
use reportrelay_core::{BundleCodec, EventSink};
use reportrelay_filter::FilterChainEngine;
use reportrelay_lineage::ReportLineageManager;

use crate::blob::BlobStore;
use crate::enrich::BundleEnricher;
use crate::queue::QueueClient;

/// Immutable bundle of collaborators injected into every stage processor.
/// Snapshots are taken at construction; there is no shared mutable
/// configuration state across concurrent invocations.
#[derive(Clone)]
pub struct PipelineContext {
    pub settings: Arc<SettingsSnapshot>,
    pub codec: Arc<dyn BundleCodec>,
    pub engine: FilterChainEngine,
    pub lineage: ReportLineageManager,
    pub blob: Arc<dyn BlobStore>,
    pub queue: Arc<dyn QueueClient>,
    pub events: Arc<dyn EventSink>,
    pub enricher: Arc<dyn BundleEnricher>,
}

//! Queue message dispatch.
//!
//! One dispatcher instance serves all stage queues: it parses the raw
//! message, loads and verifies the referenced report body, hands off to the
//! stage processor, and enqueues the successors the processor returns.
//!
//! Failure handling is the at-least-once contract: retryable errors ask the
//! queue to redeliver, everything else dead-letters. Processors are
//! idempotent, so redelivery after a partial run is always safe.

use tracing::{debug, error, warn};

use reportrelay_core::verify_digest;

use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::message::QueueMessage;
use crate::stage::{
    ConvertProcessor, EnrichmentProcessor, ReceiverFilterProcessor, RouteProcessor,
    TranslateProcessor,
};

/// Terminal disposition of one delivery.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The stage ran and its successors were enqueued.
    Completed { enqueued: usize },
    /// Transient failure; the queue should redeliver.
    Retry { error: PipelineError },
    /// Permanent failure; redelivery cannot help.
    DeadLetter { error: PipelineError },
}

impl DispatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, DispatchOutcome::Completed { .. })
    }
}

pub struct PipelineDispatcher {
    ctx: PipelineContext,
    convert: ConvertProcessor,
    route: RouteProcessor,
    enrichment: EnrichmentProcessor,
    receiver_filter: ReceiverFilterProcessor,
    translate: TranslateProcessor,
}

impl PipelineDispatcher {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            convert: ConvertProcessor::new(ctx.clone()),
            route: RouteProcessor::new(ctx.clone()),
            enrichment: EnrichmentProcessor::new(ctx.clone()),
            receiver_filter: ReceiverFilterProcessor::new(ctx.clone()),
            translate: TranslateProcessor::new(ctx.clone()),
            ctx,
        }
    }

    /// Processes one raw queue delivery end to end.
    pub async fn dispatch(&self, raw: &str) -> DispatchOutcome {
        match self.try_dispatch(raw).await {
            Ok(enqueued) => {
                debug!(enqueued, "delivery completed");
                DispatchOutcome::Completed { enqueued }
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "delivery failed, requesting redelivery");
                DispatchOutcome::Retry { error: e }
            }
            Err(e) => {
                error!(error = %e, "delivery failed permanently, dead-lettering");
                DispatchOutcome::DeadLetter { error: e }
            }
        }
    }

    async fn try_dispatch(&self, raw: &str) -> Result<usize> {
        let message = QueueMessage::from_json(raw)?;
        let pointer = message.pointer().clone();
        let parent = self
            .ctx
            .lineage
            .store()
            .fetch_report(pointer.report_id)
            .await?
            .ok_or(PipelineError::ReportNotFound(pointer.report_id))?;
        let body = self.ctx.blob.download(&pointer.blob_url).await?;
        verify_digest(&body, &pointer.digest)?;

        let outbound = match &message {
            QueueMessage::Convert { schema_name, .. } => {
                self.convert
                    .process(&pointer, schema_name, &parent, &body)
                    .await?
            }
            QueueMessage::Route { .. } => self.route.process(&pointer, &parent, &body).await?,
            QueueMessage::ReceiverEnrichment {
                receiver_full_name, ..
            } => {
                self.enrichment
                    .process(&pointer, receiver_full_name, &parent, &body)
                    .await?
            }
            QueueMessage::ReceiverFilter {
                receiver_full_name, ..
            } => {
                self.receiver_filter
                    .process(&pointer, receiver_full_name, &parent, &body)
                    .await?
            }
            QueueMessage::Translate {
                receiver_full_name, ..
            } => {
                self.translate
                    .process(&pointer, receiver_full_name, &parent, &body)
                    .await?
            }
            QueueMessage::Batch { .. } | QueueMessage::Send { .. } => {
                return Err(PipelineError::UnsupportedStage(
                    message.queue_name().to_string(),
                ));
            }
        };

        let enqueued = outbound.len();
        for out in outbound {
            self.ctx
                .queue
                .send(&out.queue_name, &out.message.to_json()?)
                .await?;
        }
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reportrelay_config::SettingsSnapshot;
    use reportrelay_core::{FhirJsonCodec, TracingEventSink};
    use reportrelay_filter::{FilterChainEngine, SimpleEvaluator, TableConditionLookup};
    use reportrelay_lineage::{InMemoryLineageStore, ReportLineageManager};

    use crate::blob::InMemoryBlobStore;
    use crate::enrich::SchemaStampEnricher;
    use crate::message::ReportPointer;
    use crate::queue::InMemoryQueue;

    fn context() -> PipelineContext {
        let settings = SettingsSnapshot::new(vec![]).unwrap();
        PipelineContext {
            settings: Arc::new(settings),
            codec: Arc::new(FhirJsonCodec),
            engine: FilterChainEngine::new(
                Arc::new(SimpleEvaluator),
                Arc::new(TableConditionLookup::from_pairs(Vec::<(String, String)>::new())),
            ),
            lineage: ReportLineageManager::new(Arc::new(InMemoryLineageStore::new())),
            blob: Arc::new(InMemoryBlobStore::new()),
            queue: Arc::new(InMemoryQueue::new()),
            events: Arc::new(TracingEventSink),
            enricher: Arc::new(SchemaStampEnricher),
        }
    }

    #[tokio::test]
    async fn test_unparseable_message_dead_letters() {
        let dispatcher = PipelineDispatcher::new(context());
        let outcome = dispatcher.dispatch("not json at all").await;
        assert!(matches!(
            outcome,
            DispatchOutcome::DeadLetter {
                error: PipelineError::MalformedMessage(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_report_requests_redelivery() {
        let dispatcher = PipelineDispatcher::new(context());
        let msg = QueueMessage::Route {
            pointer: ReportPointer {
                report_id: uuid::Uuid::new_v4(),
                blob_url: "mem://nowhere".into(),
                digest: "00".repeat(32),
                blob_sub_folder_name: "strac.default".into(),
                topic: reportrelay_core::Topic::FullElr,
            },
            schema_name: "strac/covid-19".into(),
        };
        let outcome = dispatcher.dispatch(&msg.to_json().unwrap()).await;
        // The report row may simply not be visible yet.
        assert!(matches!(
            outcome,
            DispatchOutcome::Retry {
                error: PipelineError::ReportNotFound(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_batch_and_send_are_not_ours() {
        let ctx = context();
        let dispatcher = PipelineDispatcher::new(ctx.clone());

        // Insert a report and blob so dispatch reaches the stage match.
        let body = b"anything";
        let url = ctx.blob.upload("send/x/y.hl7", body).await.unwrap();
        let parent = reportrelay_lineage::ReportFile {
            report_id: uuid::Uuid::new_v4(),
            action_id: 0,
            next_action: reportrelay_lineage::TaskAction::Send,
            body_url: Some(url.clone()),
            blob_digest: Some(reportrelay_core::sha256_hex(body)),
            body_format: reportrelay_core::ReportFormat::Hl7,
            item_count: 1,
            schema_name: "s".into(),
            schema_topic: reportrelay_core::Topic::FullElr,
            receiving_org: Some("tx-doh".into()),
            receiving_org_svc: Some("elr".into()),
            created_at: time::OffsetDateTime::now_utc(),
        };
        let mut tx = ctx.lineage.store().begin().await.unwrap();
        tx.insert_report(parent.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let msg = QueueMessage::Send {
            pointer: ReportPointer {
                report_id: parent.report_id,
                blob_url: url,
                digest: reportrelay_core::sha256_hex(body),
                blob_sub_folder_name: "strac.default".into(),
                topic: reportrelay_core::Topic::FullElr,
            },
            receiver_full_name: "tx-doh.elr".into(),
        };
        let outcome = dispatcher.dispatch(&msg.to_json().unwrap()).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::DeadLetter {
                error: PipelineError::UnsupportedStage(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_digest_mismatch_dead_letters() {
        let ctx = context();
        let dispatcher = PipelineDispatcher::new(ctx.clone());

        let url = ctx.blob.upload("route/x/y.fhir", b"tampered").await.unwrap();
        let parent = reportrelay_lineage::ReportFile {
            report_id: uuid::Uuid::new_v4(),
            action_id: 0,
            next_action: reportrelay_lineage::TaskAction::Route,
            body_url: Some(url.clone()),
            blob_digest: Some(reportrelay_core::sha256_hex(b"original")),
            body_format: reportrelay_core::ReportFormat::Fhir,
            item_count: 1,
            schema_name: "s".into(),
            schema_topic: reportrelay_core::Topic::FullElr,
            receiving_org: None,
            receiving_org_svc: None,
            created_at: time::OffsetDateTime::now_utc(),
        };
        let mut tx = ctx.lineage.store().begin().await.unwrap();
        tx.insert_report(parent.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let msg = QueueMessage::Route {
            pointer: ReportPointer {
                report_id: parent.report_id,
                blob_url: url,
                digest: reportrelay_core::sha256_hex(b"original"),
                blob_sub_folder_name: "strac.default".into(),
                topic: reportrelay_core::Topic::FullElr,
            },
            schema_name: "s".into(),
        };
        let outcome = dispatcher.dispatch(&msg.to_json().unwrap()).await;
        assert!(matches!(outcome, DispatchOutcome::DeadLetter { .. }));
    }
}

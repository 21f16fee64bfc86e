//! Receiver enrichment: applies the receiver's enrichment schemas in
//! configured order, then hands the enriched copy to receiver filtering.

use serde_json::Value;
use tracing::{info, warn};

use reportrelay_config::{ConfigError, ReceiverRef};
use reportrelay_core::event::{PipelineEvent, PipelineEventName, PARAM_ENRICHMENTS};
use reportrelay_core::{sha256_hex, ReportFormat};
use reportrelay_lineage::{ActionLogEntry, ChildSpec, ReportFile, TaskAction};

use crate::context::PipelineContext;
use crate::error::Result;
use crate::message::{OutboundMessage, ReportPointer};
use crate::stage::{child_blob_key, committed_children, successor_messages};

pub struct EnrichmentProcessor {
    ctx: PipelineContext,
}

impl EnrichmentProcessor {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn process(
        &self,
        pointer: &ReportPointer,
        receiver_full_name: &str,
        parent: &ReportFile,
        body: &[u8],
    ) -> Result<Vec<OutboundMessage>> {
        if let Some(children) =
            committed_children(&self.ctx, parent, TaskAction::ReceiverEnrichment).await?
        {
            return successor_messages(&children, &pointer.blob_sub_folder_name);
        }

        let receiver_ref = ReceiverRef::parse(receiver_full_name)?;
        let receiver = match self.ctx.settings.find_receiver(&receiver_ref) {
            Ok(receiver) => receiver,
            Err(ConfigError::UnknownReceiver(_)) => {
                return terminate_unconfigured(
                    &self.ctx,
                    parent,
                    TaskAction::ReceiverEnrichment,
                    &receiver_ref,
                )
                .await;
            }
            Err(e) => return Err(e.into()),
        };

        let mut bundle = self.ctx.codec.decode(body, ReportFormat::Fhir)?;
        for schema in &receiver.enrichment_schemas {
            bundle = self.ctx.enricher.apply(schema, &bundle)?;
        }
        let bytes = self.ctx.codec.encode(&bundle, ReportFormat::Fhir)?;
        let key = child_blob_key(
            TaskAction::ReceiverFilter,
            receiver_full_name,
            ReportFormat::Fhir.extension(),
        );
        let url = self.ctx.blob.upload(&key, &bytes).await?;
        let spec = ChildSpec::live(
            url,
            sha256_hex(&bytes),
            ReportFormat::Fhir,
            parent.item_count,
            TaskAction::ReceiverFilter,
            parent.schema_name.clone(),
        )
        .for_receiver(
            receiver_ref.organization_name.clone(),
            receiver_ref.receiver_name.clone(),
        );

        let (_, child) = self
            .ctx
            .lineage
            .create_child(parent, TaskAction::ReceiverEnrichment, spec, vec![])
            .await?;
        info!(
            report_id = %parent.report_id,
            receiver = receiver_full_name,
            schemas = receiver.enrichment_schemas.len(),
            "enriched report"
        );
        self.ctx.events.emit(
            PipelineEvent::new(PipelineEventName::ItemTransformed, child.report_id)
                .with_parent(parent.report_id)
                .with_topic(parent.schema_topic)
                .with_bundle(&bundle)
                .with_param(
                    PARAM_ENRICHMENTS,
                    Value::from(receiver.enrichment_schemas.clone()),
                ),
        );
        successor_messages(&[child], &pointer.blob_sub_folder_name)
    }
}

/// A receiver-scoped report whose receiver has disappeared from settings
/// cannot proceed; terminate the branch with a warning so the task resolves
/// instead of redelivering forever.
pub(crate) async fn terminate_unconfigured(
    ctx: &PipelineContext,
    parent: &ReportFile,
    action: TaskAction,
    receiver_ref: &ReceiverRef,
) -> Result<Vec<OutboundMessage>> {
    warn!(
        report_id = %parent.report_id,
        receiver = %receiver_ref,
        "receiver no longer configured, terminating branch"
    );
    ctx.lineage
        .terminate(
            parent,
            action,
            &receiver_ref.organization_name,
            &receiver_ref.receiver_name,
            vec![ActionLogEntry::report_warning(
                parent.report_id,
                format!("receiver {receiver_ref} is no longer configured"),
            )],
        )
        .await?;
    Ok(Vec::new())
}

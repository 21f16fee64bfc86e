//! Receiver filter: runs the item-level condition stage for one receiver,
//! prunes observations the receiver does not want, and either advances the
//! pruned bundle to translation or terminates the branch.

use serde_json::Value;
use tracing::info;

use reportrelay_config::{ConfigError, ReceiverRef};
use reportrelay_core::event::{
    PipelineEvent, PipelineEventName, PARAM_FAILING_FILTERS, PARAM_FILTER_TYPE,
    PARAM_RECEIVER_NAME,
};
use reportrelay_core::{sha256_hex, Bundle, ReportFormat};
use reportrelay_filter::{ConditionOutcome, FilterResult};
use reportrelay_lineage::{ActionLogEntry, ChildSpec, ReportFile, TaskAction};

use crate::context::PipelineContext;
use crate::error::Result;
use crate::message::{OutboundMessage, ReportPointer};
use crate::stage::enrich::terminate_unconfigured;
use crate::stage::{child_blob_key, committed_children, successor_messages};

pub struct ReceiverFilterProcessor {
    ctx: PipelineContext,
}

impl ReceiverFilterProcessor {
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
            committed_children(&self.ctx, parent, TaskAction::ReceiverFilter).await?
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
                    TaskAction::ReceiverFilter,
                    &receiver_ref,
                )
                .await;
            }
            Err(e) => return Err(e.into()),
        };

        let bundle = self.ctx.codec.decode(body, ReportFormat::Fhir)?;
        match self
            .ctx
            .engine
            .apply_condition_filter(&bundle, &receiver_ref, receiver)?
        {
            ConditionOutcome::Accepted(pruned) => {
                let bytes = self.ctx.codec.encode(&pruned, ReportFormat::Fhir)?;
                let key = child_blob_key(
                    TaskAction::Translate,
                    receiver_full_name,
                    ReportFormat::Fhir.extension(),
                );
                let url = self.ctx.blob.upload(&key, &bytes).await?;
                let spec = ChildSpec::live(
                    url,
                    sha256_hex(&bytes),
                    ReportFormat::Fhir,
                    parent.item_count,
                    TaskAction::Translate,
                    parent.schema_name.clone(),
                )
                .for_receiver(
                    receiver_ref.organization_name.clone(),
                    receiver_ref.receiver_name.clone(),
                );
                let (_, child) = self
                    .ctx
                    .lineage
                    .create_child(parent, TaskAction::ReceiverFilter, spec, vec![])
                    .await?;
                info!(
                    report_id = %parent.report_id,
                    receiver = receiver_full_name,
                    kept = pruned.observation_keys().len(),
                    dropped = bundle.observation_keys().len() - pruned.observation_keys().len(),
                    "receiver filter passed"
                );
                successor_messages(&[child], &pointer.blob_sub_folder_name)
            }
            ConditionOutcome::Rejected(failure) => {
                self.reject(parent, &bundle, &receiver_ref, failure).await
            }
        }
    }

    async fn reject(
        &self,
        parent: &ReportFile,
        bundle: &Bundle,
        receiver_ref: &ReceiverRef,
        failure: FilterResult,
    ) -> Result<Vec<OutboundMessage>> {
        let mut logs = vec![ActionLogEntry::filter(
            parent.report_id,
            failure.summary(),
            serde_json::to_value(&failure).unwrap_or(Value::Null),
        )];
        let keys = bundle.observation_keys();
        for failing in &failure.failing_observation_keys {
            if let Some(position) = keys.iter().position(|k| k == failing) {
                logs.push(ActionLogEntry::item_filter(
                    parent.report_id,
                    (position + 1) as u32,
                    format!("{failing} filtered out by {}", failure.filter_type),
                ));
            }
        }
        self.ctx
            .lineage
            .terminate(
                parent,
                TaskAction::ReceiverFilter,
                &receiver_ref.organization_name,
                &receiver_ref.receiver_name,
                logs,
            )
            .await?;
        info!(
            report_id = %parent.report_id,
            receiver = %receiver_ref,
            filter = failure.filter_type.as_str(),
            "receiver filter terminated branch"
        );
        self.ctx.events.emit(
            PipelineEvent::new(PipelineEventName::ItemFilterFailed, parent.report_id)
                .with_topic(parent.schema_topic)
                .with_bundle(bundle)
                .with_param(PARAM_FILTER_TYPE, failure.filter_type.as_str())
                .with_param(
                    PARAM_FAILING_FILTERS,
                    Value::from(failure.filter_expressions.clone()),
                )
                .with_param(PARAM_RECEIVER_NAME, failure.receiver_name.clone()),
        );
        Ok(Vec::new())
    }
}

//! Router: evaluates every subscribed receiver's report-level filters and
//! fans out one child per receiver, live for those that passed and
//! terminated for those that did not.
//!
//! The whole fan-out commits in one transaction, so a crash mid-route never
//! leaves a receiver silently skipped.

use serde_json::Value;
use tracing::{debug, info, warn};

use reportrelay_config::{Receiver, ReceiverRef};
use reportrelay_core::event::{
    PipelineEvent, PipelineEventName, PARAM_FAILING_FILTERS, PARAM_FILTER_TYPE,
    PARAM_RECEIVER_NAME,
};
use reportrelay_core::{sha256_hex, Bundle, ReportFormat};
use reportrelay_filter::FilterResult;
use reportrelay_lineage::{ActionLogEntry, ChildSpec, ReportFile, TaskAction};

use crate::context::PipelineContext;
use crate::error::Result;
use crate::message::{OutboundMessage, ReportPointer};
use crate::stage::{child_blob_key, committed_children, successor_messages};

pub struct RouteProcessor {
    ctx: PipelineContext,
}

impl RouteProcessor {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn process(
        &self,
        pointer: &ReportPointer,
        parent: &ReportFile,
        body: &[u8],
    ) -> Result<Vec<OutboundMessage>> {
        if let Some(children) = committed_children(&self.ctx, parent, TaskAction::Route).await? {
            return successor_messages(&children, &pointer.blob_sub_folder_name);
        }

        let bundle = self.ctx.codec.decode(body, ReportFormat::Fhir)?;
        let subscribed = self.ctx.settings.receivers_for_topic(parent.schema_topic);
        if subscribed.is_empty() {
            // Zero-child actions have no lineage edge for the redelivery
            // check to find, so a redelivered message records another action
            // row and warning. The fan-out stays at zero, so the duplicate
            // only pads the audit trail.
            warn!(
                report_id = %parent.report_id,
                topic = parent.schema_topic.as_str(),
                "no receivers subscribe to topic"
            );
            self.ctx
                .lineage
                .record_children(
                    parent,
                    TaskAction::Route,
                    vec![],
                    vec![ActionLogEntry::report_warning(
                        parent.report_id,
                        format!(
                            "no receivers subscribe to topic {}",
                            parent.schema_topic.as_str()
                        ),
                    )],
                )
                .await?;
            return Ok(Vec::new());
        }

        let mut specs = Vec::with_capacity(subscribed.len());
        let mut logs = Vec::new();
        for (receiver_ref, receiver) in &subscribed {
            if !receiver.customer_status.is_active() {
                // Inactive receivers terminate silently, like jurisdictional
                // mismatches: routine, not reportable.
                debug!(receiver = %receiver_ref, "receiver inactive, terminating branch");
                specs.push(self.terminated_spec(parent, receiver_ref));
                continue;
            }
            match self
                .ctx
                .engine
                .apply_report_filters(&bundle, receiver_ref, receiver)?
            {
                Some(failure) => {
                    self.log_rejection(parent, &bundle, &failure, &mut logs);
                    specs.push(self.terminated_spec(parent, receiver_ref));
                }
                None => {
                    specs.push(
                        self.routed_spec(parent, receiver_ref, receiver, body)
                            .await?,
                    );
                    self.ctx.events.emit(
                        PipelineEvent::new(PipelineEventName::ItemRouted, parent.report_id)
                            .with_topic(parent.schema_topic)
                            .with_bundle(&bundle)
                            .with_param(PARAM_RECEIVER_NAME, receiver_ref.full_name()),
                    );
                }
            }
        }

        let record = self
            .ctx
            .lineage
            .record_children(parent, TaskAction::Route, specs, logs)
            .await?;
        let live = record.children.iter().filter(|c| !c.is_terminated()).count();
        info!(
            report_id = %parent.report_id,
            receivers = subscribed.len(),
            routed = live,
            "routed report"
        );
        successor_messages(&record.children, &pointer.blob_sub_folder_name)
    }

    fn terminated_spec(&self, parent: &ReportFile, receiver_ref: &ReceiverRef) -> ChildSpec {
        ChildSpec::terminated(parent.body_format, parent.schema_name.clone()).for_receiver(
            receiver_ref.organization_name.clone(),
            receiver_ref.receiver_name.clone(),
        )
    }

    /// Uploads a per-receiver copy of the body and specs a live child aimed
    /// at enrichment when the receiver has enrichment schemas, receiver
    /// filtering otherwise.
    async fn routed_spec(
        &self,
        parent: &ReportFile,
        receiver_ref: &ReceiverRef,
        receiver: &Receiver,
        body: &[u8],
    ) -> Result<ChildSpec> {
        let next = if receiver.has_enrichments() {
            TaskAction::ReceiverEnrichment
        } else {
            TaskAction::ReceiverFilter
        };
        let key = child_blob_key(next, &receiver_ref.full_name(), ReportFormat::Fhir.extension());
        let url = self.ctx.blob.upload(&key, body).await?;
        Ok(ChildSpec::live(
            url,
            sha256_hex(body),
            ReportFormat::Fhir,
            parent.item_count,
            next,
            parent.schema_name.clone(),
        )
        .for_receiver(
            receiver_ref.organization_name.clone(),
            receiver_ref.receiver_name.clone(),
        ))
    }

    fn log_rejection(
        &self,
        parent: &ReportFile,
        bundle: &Bundle,
        failure: &FilterResult,
        logs: &mut Vec<ActionLogEntry>,
    ) {
        if failure.log_suppressed {
            debug!(
                report_id = %parent.report_id,
                receiver = %failure.receiver_name,
                "jurisdictional mismatch, terminating without log"
            );
            return;
        }
        logs.push(ActionLogEntry::filter(
            parent.report_id,
            failure.summary(),
            serde_json::to_value(failure).unwrap_or(Value::Null),
        ));
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
    }
}

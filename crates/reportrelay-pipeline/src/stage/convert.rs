//! Converter: splits a received blob into items, decodes each one, and
//! fans out one child report per decodable item.
//!
//! Decode failures are item-scoped: a garbled item gets an action-log error
//! naming its one-based index while its siblings proceed. An unknown or
//! inactive sender rejects the whole submission with zero children.

use serde_json::json;
use tracing::{info, warn};

use reportrelay_config::ConfigError;
use reportrelay_core::event::{PipelineEvent, PipelineEventName};
use reportrelay_core::{sha256_hex, ReportFormat};
use reportrelay_lineage::{ActionLogEntry, ChildSpec, ReportFile, TaskAction};

use crate::context::PipelineContext;
use crate::error::Result;
use crate::message::{OutboundMessage, ReportPointer};
use crate::split::split_items;
use crate::stage::{child_blob_key, committed_children, successor_messages};

/// How much of a malformed item the action log retains for triage.
const ERROR_EXCERPT_CHARS: usize = 80;

pub struct ConvertProcessor {
    ctx: PipelineContext,
}

impl ConvertProcessor {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub async fn process(
        &self,
        pointer: &ReportPointer,
        schema_name: &str,
        parent: &ReportFile,
        body: &[u8],
    ) -> Result<Vec<OutboundMessage>> {
        if let Some(children) = committed_children(&self.ctx, parent, TaskAction::Convert).await? {
            return successor_messages(&children, &pointer.blob_sub_folder_name);
        }

        match self.ctx.settings.find_sender(&pointer.blob_sub_folder_name) {
            Ok(sender) if sender.customer_status.is_active() => {}
            Ok(_) => return self.reject_submission(parent, "sender is not active").await,
            Err(ConfigError::UnknownSender(_)) => {
                return self.reject_submission(parent, "unknown sender").await;
            }
            Err(e) => return Err(e.into()),
        }

        let items = split_items(body, parent.body_format);
        let total = items.len();
        let mut specs = Vec::with_capacity(total);
        let mut logs = Vec::new();

        for (position, item) in items.iter().enumerate() {
            let index = (position + 1) as u32;
            match self.ctx.codec.decode(item, parent.body_format) {
                Ok(bundle) => {
                    let bytes = self.ctx.codec.encode(&bundle, ReportFormat::Fhir)?;
                    let key = child_blob_key(
                        TaskAction::Route,
                        &pointer.blob_sub_folder_name,
                        ReportFormat::Fhir.extension(),
                    );
                    let url = self.ctx.blob.upload(&key, &bytes).await?;
                    specs.push(ChildSpec::live(
                        url,
                        sha256_hex(&bytes),
                        ReportFormat::Fhir,
                        1,
                        TaskAction::Route,
                        schema_name,
                    ));
                }
                Err(err) if err.is_item_scoped() => {
                    let excerpt: String = String::from_utf8_lossy(item)
                        .chars()
                        .take(ERROR_EXCERPT_CHARS)
                        .collect();
                    warn!(
                        report_id = %parent.report_id,
                        item = index,
                        error = %err,
                        "item failed to decode"
                    );
                    logs.push(ActionLogEntry::item_error(
                        index,
                        format!("Item {index} of {total} failed to decode: {err}"),
                        json!({ "excerpt": excerpt }),
                    ));
                    self.ctx.events.emit(
                        PipelineEvent::new(
                            PipelineEventName::ItemFailedValidation,
                            parent.report_id,
                        )
                        .with_topic(parent.schema_topic),
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!(
            report_id = %parent.report_id,
            sender = %pointer.blob_sub_folder_name,
            items = total,
            converted = specs.len(),
            "converted submission"
        );
        let record = self
            .ctx
            .lineage
            .record_children(parent, TaskAction::Convert, specs, logs)
            .await?;
        successor_messages(&record.children, &pointer.blob_sub_folder_name)
    }

    /// Records the submission as rejected: an action with zero children and
    /// one warning log, so the audit trail shows the report arrived and why
    /// it went nowhere.
    ///
    /// Zero-child actions leave no lineage edge, so the redelivery check
    /// cannot see them: a redelivered rejection records another action row
    /// and warning. The fan-out stays at zero either way, so the duplicate
    /// is an audit-trail cosmetic, not a correctness problem.
    async fn reject_submission(
        &self,
        parent: &ReportFile,
        reason: &str,
    ) -> Result<Vec<OutboundMessage>> {
        warn!(report_id = %parent.report_id, reason, "submission rejected");
        self.ctx
            .lineage
            .record_children(
                parent,
                TaskAction::Convert,
                vec![],
                vec![ActionLogEntry::report_warning(
                    parent.report_id,
                    format!("submission rejected: {reason}"),
                )],
            )
            .await?;
        Ok(Vec::new())
    }
}

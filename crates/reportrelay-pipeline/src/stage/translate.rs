//! Translator: produces the receiver's wire format and hands the report to
//! batching, or straight to sending for `is_send_original` receivers.

use tracing::info;

use reportrelay_config::{ConfigError, Receiver, ReceiverRef};
use reportrelay_core::event::{PipelineEvent, PipelineEventName, PARAM_RECEIVER_NAME};
use reportrelay_core::{sha256_hex, ReportFormat};
use reportrelay_lineage::{ChildSpec, ReportFile, TaskAction};

use crate::context::PipelineContext;
use crate::error::Result;
use crate::message::{OutboundMessage, ReportPointer};
use crate::stage::enrich::terminate_unconfigured;
use crate::stage::{child_blob_key, committed_children, successor_messages};

pub struct TranslateProcessor {
    ctx: PipelineContext,
}

impl TranslateProcessor {
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
        if let Some(children) = committed_children(&self.ctx, parent, TaskAction::Translate).await?
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
                    TaskAction::Translate,
                    &receiver_ref,
                )
                .await;
            }
            Err(e) => return Err(e.into()),
        };

        let (bytes, format, next) = self.translate(receiver, parent, body)?;
        let key = child_blob_key(next, receiver_full_name, format.extension());
        let url = self.ctx.blob.upload(&key, &bytes).await?;
        let schema_name = receiver
            .translation_schema
            .clone()
            .unwrap_or_else(|| parent.schema_name.clone());
        let spec = ChildSpec::live(
            url,
            sha256_hex(&bytes),
            format,
            parent.item_count,
            next,
            schema_name,
        )
        .for_receiver(
            receiver_ref.organization_name.clone(),
            receiver_ref.receiver_name.clone(),
        );

        let (_, child) = self
            .ctx
            .lineage
            .create_child(parent, TaskAction::Translate, spec, vec![])
            .await?;
        info!(
            report_id = %parent.report_id,
            receiver = receiver_full_name,
            format = format.as_str(),
            next = next.as_str(),
            "translated report"
        );
        self.ctx.events.emit(
            PipelineEvent::new(PipelineEventName::ItemTransformed, child.report_id)
                .with_parent(parent.report_id)
                .with_topic(parent.schema_topic)
                .with_param(PARAM_RECEIVER_NAME, receiver_full_name),
        );
        successor_messages(&[child], &pointer.blob_sub_folder_name)
    }

    /// `is_send_original` forwards the body untouched and skips batching;
    /// everyone else gets a re-encode into the receiver's wire format.
    fn translate(
        &self,
        receiver: &Receiver,
        parent: &ReportFile,
        body: &[u8],
    ) -> Result<(Vec<u8>, ReportFormat, TaskAction)> {
        if receiver.is_send_original {
            return Ok((body.to_vec(), parent.body_format, TaskAction::Send));
        }
        let bundle = self.ctx.codec.decode(body, ReportFormat::Fhir)?;
        let bytes = self.ctx.codec.encode(&bundle, receiver.format)?;
        Ok((bytes, receiver.format, TaskAction::Batch))
    }
}

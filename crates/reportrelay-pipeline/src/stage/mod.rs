//! Stage processors: Converter, Router, Receiver Enrichment, Receiver
//! Filter, and Translator.
//!
//! Each processor consumes one queue message type, performs its
//! transformation, records lineage in one transaction, and returns the
//! successor messages to enqueue. Processors are idempotent under
//! redelivery: when children already exist for the parent report and stage
//! action, the successors are rebuilt from the committed rows and re-sent
//! instead of inserting duplicates.

pub mod convert;
pub mod enrich;
pub mod receiver_filter;
pub mod route;
pub mod translate;

pub use convert::ConvertProcessor;
pub use enrich::EnrichmentProcessor;
pub use receiver_filter::ReceiverFilterProcessor;
pub use route::RouteProcessor;
pub use translate::TranslateProcessor;

use uuid::Uuid;

use reportrelay_lineage::{ReportFile, TaskAction};

use crate::error::{PipelineError, Result};
use crate::message::ReportPointer;

/// Blob key for a new child body: `<stage>/<folder>/<uuid>.<ext>`.
pub(crate) fn child_blob_key(stage: TaskAction, folder: &str, extension: &str) -> String {
    format!("{}/{}/{}.{}", stage.as_str(), folder, Uuid::new_v4(), extension)
}

/// Builds the common envelope for a live child report.
///
/// # Errors
///
/// Returns an invariant error when the child has no body; callers must only
/// point messages at live reports.
pub(crate) fn child_pointer(
    child: &ReportFile,
    blob_sub_folder_name: &str,
) -> Result<ReportPointer> {
    let (blob_url, digest) = match (&child.body_url, &child.blob_digest) {
        (Some(url), Some(digest)) => (url.clone(), digest.clone()),
        _ => {
            return Err(PipelineError::Lineage(
                reportrelay_lineage::LineageError::invariant(format!(
                    "cannot build a message for terminated report {}",
                    child.report_id
                )),
            ));
        }
    };
    Ok(ReportPointer {
        report_id: child.report_id,
        blob_url,
        digest,
        blob_sub_folder_name: blob_sub_folder_name.to_string(),
        topic: child.schema_topic,
    })
}

/// Builds the successor queue message for a live child from its committed
/// row. Rebuilding from rows (rather than in-flight state) is what makes
/// redelivery heal a crash between commit and enqueue.
pub(crate) fn message_for_child(
    child: &ReportFile,
    blob_sub_folder_name: &str,
) -> Result<crate::message::QueueMessage> {
    use crate::message::QueueMessage;

    let pointer = child_pointer(child, blob_sub_folder_name)?;
    let receiver_full_name = || {
        child.receiver_full_name().ok_or_else(|| {
            PipelineError::Lineage(reportrelay_lineage::LineageError::invariant(format!(
                "report {} advancing to {} has no receiver",
                child.report_id, child.next_action
            )))
        })
    };
    match child.next_action {
        TaskAction::Route => Ok(QueueMessage::Route {
            pointer,
            schema_name: child.schema_name.clone(),
        }),
        TaskAction::ReceiverEnrichment => Ok(QueueMessage::ReceiverEnrichment {
            pointer,
            receiver_full_name: receiver_full_name()?,
        }),
        TaskAction::ReceiverFilter => Ok(QueueMessage::ReceiverFilter {
            pointer,
            receiver_full_name: receiver_full_name()?,
        }),
        TaskAction::Translate => Ok(QueueMessage::Translate {
            pointer,
            receiver_full_name: receiver_full_name()?,
        }),
        TaskAction::Batch => Ok(QueueMessage::Batch {
            pointer,
            receiver_full_name: receiver_full_name()?,
        }),
        TaskAction::Send => Ok(QueueMessage::Send {
            pointer,
            receiver_full_name: receiver_full_name()?,
        }),
        other => Err(PipelineError::UnsupportedStage(other.as_str().to_string())),
    }
}

/// Successor messages for every live child of a recorded action.
pub(crate) fn successor_messages(
    children: &[ReportFile],
    blob_sub_folder_name: &str,
) -> Result<Vec<crate::message::OutboundMessage>> {
    children
        .iter()
        .filter(|child| !child.is_terminated())
        .map(|child| {
            message_for_child(child, blob_sub_folder_name).map(crate::message::OutboundMessage::new)
        })
        .collect()
}

/// Fetches already-committed children for a parent+action, the redelivery
/// fast path.
pub(crate) async fn committed_children(
    ctx: &crate::context::PipelineContext,
    parent: &ReportFile,
    action: TaskAction,
) -> Result<Option<Vec<ReportFile>>> {
    let children = ctx
        .lineage
        .store()
        .fetch_children_for_action(parent.report_id, action)
        .await?;
    Ok(if children.is_empty() {
        None
    } else {
        Some(children)
    })
}

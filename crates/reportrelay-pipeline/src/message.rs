//! Queue message contracts between stages.
//!
//! Every message is JSON with a `type` tag naming the stage, a common
//! envelope pointing at a report blob, and stage-specific additions. The
//! digest is the SHA-256 of the referenced blob and must be verified before
//! acting on the message.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reportrelay_core::Topic;
use reportrelay_lineage::TaskAction;

use crate::error::{PipelineError, Result};

/// Common envelope fields shared by all stage messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPointer {
    pub report_id: Uuid,
    #[serde(rename = "blobURL")]
    pub blob_url: String,
    /// Hex SHA-256 of the blob at `blob_url`.
    pub digest: String,
    /// Sender identifier (`org.senderName`), also the blob folder prefix.
    pub blob_sub_folder_name: String,
    pub topic: Topic,
}

/// One stage message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueMessage {
    #[serde(rename_all = "camelCase")]
    Convert {
        #[serde(flatten)]
        pointer: ReportPointer,
        schema_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Route {
        #[serde(flatten)]
        pointer: ReportPointer,
        schema_name: String,
    },
    #[serde(rename_all = "camelCase")]
    ReceiverEnrichment {
        #[serde(flatten)]
        pointer: ReportPointer,
        receiver_full_name: String,
    },
    #[serde(rename_all = "camelCase")]
    ReceiverFilter {
        #[serde(flatten)]
        pointer: ReportPointer,
        receiver_full_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Translate {
        #[serde(flatten)]
        pointer: ReportPointer,
        receiver_full_name: String,
    },
    /// Hand-off to the batching stage (consumed outside this core).
    #[serde(rename_all = "camelCase")]
    Batch {
        #[serde(flatten)]
        pointer: ReportPointer,
        receiver_full_name: String,
    },
    /// Direct hand-off to the send stage (`is_send_original` receivers).
    #[serde(rename_all = "camelCase")]
    Send {
        #[serde(flatten)]
        pointer: ReportPointer,
        receiver_full_name: String,
    },
}

impl QueueMessage {
    pub fn pointer(&self) -> &ReportPointer {
        match self {
            QueueMessage::Convert { pointer, .. }
            | QueueMessage::Route { pointer, .. }
            | QueueMessage::ReceiverEnrichment { pointer, .. }
            | QueueMessage::ReceiverFilter { pointer, .. }
            | QueueMessage::Translate { pointer, .. }
            | QueueMessage::Batch { pointer, .. }
            | QueueMessage::Send { pointer, .. } => pointer,
        }
    }

    /// The stage this message drives.
    pub fn action(&self) -> TaskAction {
        match self {
            QueueMessage::Convert { .. } => TaskAction::Convert,
            QueueMessage::Route { .. } => TaskAction::Route,
            QueueMessage::ReceiverEnrichment { .. } => TaskAction::ReceiverEnrichment,
            QueueMessage::ReceiverFilter { .. } => TaskAction::ReceiverFilter,
            QueueMessage::Translate { .. } => TaskAction::Translate,
            QueueMessage::Batch { .. } => TaskAction::Batch,
            QueueMessage::Send { .. } => TaskAction::Send,
        }
    }

    /// Queue a message of this type is delivered on (one queue per stage).
    pub fn queue_name(&self) -> &'static str {
        self.action().as_str()
    }

    pub fn receiver_full_name(&self) -> Option<&str> {
        match self {
            QueueMessage::ReceiverEnrichment {
                receiver_full_name, ..
            }
            | QueueMessage::ReceiverFilter {
                receiver_full_name, ..
            }
            | QueueMessage::Translate {
                receiver_full_name, ..
            }
            | QueueMessage::Batch {
                receiver_full_name, ..
            }
            | QueueMessage::Send {
                receiver_full_name, ..
            } => Some(receiver_full_name),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| PipelineError::malformed(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| PipelineError::malformed(e.to_string()))
    }
}

/// A successor message bound for a specific queue.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub queue_name: String,
    pub message: QueueMessage,
}

impl OutboundMessage {
    pub fn new(message: QueueMessage) -> Self {
        Self {
            queue_name: message.queue_name().to_string(),
            message,
        }
    }
}

//! Rows of the lineage store: `action`, `report_file`, `report_lineage`,
//! `task`, and the append-only action log.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use reportrelay_core::{ReportFormat, Topic};

use crate::error::{LineageError, Result};

/// Pipeline stage, as recorded on actions and on the live report's `next_action`.
///
/// The state machine is forward-only:
/// `receive → convert → route → (destination_filter | receiver_enrichment) →
/// receiver_filter → translate → batch → send → none`, where `none` is
/// terminal (either the send hand-off completed or a filter terminated the
/// branch early).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Receive,
    Convert,
    Route,
    DestinationFilter,
    ReceiverEnrichment,
    ReceiverFilter,
    Translate,
    Batch,
    Send,
    None,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Receive => "receive",
            TaskAction::Convert => "convert",
            TaskAction::Route => "route",
            TaskAction::DestinationFilter => "destination_filter",
            TaskAction::ReceiverEnrichment => "receiver_enrichment",
            TaskAction::ReceiverFilter => "receiver_filter",
            TaskAction::Translate => "translate",
            TaskAction::Batch => "batch",
            TaskAction::Send => "send",
            TaskAction::None => "none",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskAction::None)
    }

    /// Stages a report at this action may legally advance to. Used to assert
    /// the forward-only property when children are recorded.
    pub fn successors(&self) -> &'static [TaskAction] {
        match self {
            TaskAction::Receive => &[TaskAction::Convert],
            TaskAction::Convert => &[TaskAction::Route],
            TaskAction::Route | TaskAction::DestinationFilter => &[
                TaskAction::ReceiverEnrichment,
                TaskAction::ReceiverFilter,
                TaskAction::None,
            ],
            TaskAction::ReceiverEnrichment => &[TaskAction::ReceiverFilter],
            TaskAction::ReceiverFilter => &[TaskAction::Translate, TaskAction::None],
            TaskAction::Translate => &[TaskAction::Batch, TaskAction::Send],
            TaskAction::Batch => &[TaskAction::Send],
            TaskAction::Send => &[TaskAction::None],
            TaskAction::None => &[],
        }
    }

    pub fn can_advance_to(&self, next: TaskAction) -> bool {
        next == TaskAction::None || self.successors().contains(&next)
    }
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution of a stage processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: i64,
    pub action_name: TaskAction,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// An immutable unit of work at one pipeline stage.
///
/// Invariant: `body_url == None ⇔ item_count == 0 ⇔ next_action == None`
/// (the terminated-by-filter state). Rows are never mutated; a stage
/// supersedes its input by inserting child rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFile {
    pub report_id: Uuid,
    /// Action that created this report.
    pub action_id: i64,
    pub next_action: TaskAction,
    pub body_url: Option<String>,
    /// SHA-256 of the body blob, carried on queue messages for verification.
    pub blob_digest: Option<String>,
    pub body_format: ReportFormat,
    pub item_count: u32,
    pub schema_name: String,
    pub schema_topic: Topic,
    pub receiving_org: Option<String>,
    pub receiving_org_svc: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ReportFile {
    /// True when a filter terminated this branch.
    pub fn is_terminated(&self) -> bool {
        self.body_url.is_none()
    }

    /// Receiver full name (`org.receiverName`) when this report is
    /// receiver-scoped.
    pub fn receiver_full_name(&self) -> Option<String> {
        match (&self.receiving_org, &self.receiving_org_svc) {
            (Some(org), Some(svc)) => Some(format!("{org}.{svc}")),
            _ => None,
        }
    }

    /// Checks the terminated-state invariant.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::InvariantViolation` when `body_url`,
    /// `item_count`, and `next_action` disagree about termination.
    pub fn check_invariant(&self) -> Result<()> {
        let terminated = self.body_url.is_none();
        if terminated != (self.item_count == 0) || terminated != self.next_action.is_terminal() {
            return Err(LineageError::invariant(format!(
                "report {}: body_url={:?} item_count={} next_action={}",
                self.report_id,
                self.body_url.as_deref().map(|_| "present"),
                self.item_count,
                self.next_action
            )));
        }
        Ok(())
    }
}

/// Edge of the lineage DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLineage {
    pub parent_report_id: Uuid,
    pub child_report_id: Uuid,
    pub parent_action_id: i64,
    /// Position of the child within its action's fan-out (item index for
    /// the Converter, receiver index for the Router).
    pub task_index: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Outstanding-work marker: exists for every live report until its
/// successor message is enqueued and consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub report_id: Uuid,
    pub next_action: TaskAction,
    pub body_format: ReportFormat,
    pub receiver_name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Scope of an action-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLogScope {
    Report,
    Item,
    Filter,
}

/// Severity of an action-log entry. `Filter` marks an expected business
/// rejection, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionLogLevel {
    Info,
    Warning,
    Error,
    Filter,
}

/// Append-only audit entry tied to an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// Filled in by the transaction when the owning action is inserted.
    pub action_id: Option<i64>,
    pub report_id: Option<Uuid>,
    pub scope: ActionLogScope,
    pub level: ActionLogLevel,
    /// One-based item index for item-scoped entries.
    pub item_index: Option<u32>,
    pub message: String,
    pub detail: Value,
}

impl ActionLogEntry {
    pub fn item_error(index: u32, message: impl Into<String>, detail: Value) -> Self {
        Self {
            action_id: None,
            report_id: None,
            scope: ActionLogScope::Item,
            level: ActionLogLevel::Error,
            item_index: Some(index),
            message: message.into(),
            detail,
        }
    }

    pub fn filter(report_id: Uuid, message: impl Into<String>, detail: Value) -> Self {
        Self {
            action_id: None,
            report_id: Some(report_id),
            scope: ActionLogScope::Filter,
            level: ActionLogLevel::Filter,
            item_index: None,
            message: message.into(),
            detail,
        }
    }

    pub fn item_filter(report_id: Uuid, index: u32, message: impl Into<String>) -> Self {
        Self {
            action_id: None,
            report_id: Some(report_id),
            scope: ActionLogScope::Item,
            level: ActionLogLevel::Filter,
            item_index: Some(index),
            message: message.into(),
            detail: Value::Null,
        }
    }

    pub fn report_warning(report_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            action_id: None,
            report_id: Some(report_id),
            scope: ActionLogScope::Report,
            level: ActionLogLevel::Warning,
            item_index: None,
            message: message.into(),
            detail: Value::Null,
        }
    }
}

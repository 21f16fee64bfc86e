//! The report lineage manager.
//!
//! One stage invocation = one transaction: the action row, every child
//! report, their lineage edges, their tasks, and the action log all commit
//! together or not at all. Queue enqueues for new tasks happen only after
//! the commit, so a crash can at worst lose a successor message, never
//! produce a duplicate child for the same parent+action.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use reportrelay_core::ReportFormat;

use crate::error::{LineageError, Result};
use crate::model::{Action, ActionLogEntry, ReportFile, ReportLineage, Task, TaskAction};
use crate::store::LineageStore;

/// Specification of one child report to create.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub body_url: Option<String>,
    pub blob_digest: Option<String>,
    pub body_format: ReportFormat,
    pub item_count: u32,
    pub next_action: TaskAction,
    pub schema_name: String,
    pub receiving_org: Option<String>,
    pub receiving_org_svc: Option<String>,
}

impl ChildSpec {
    /// A live child carrying new blob content.
    pub fn live(
        body_url: impl Into<String>,
        blob_digest: impl Into<String>,
        body_format: ReportFormat,
        item_count: u32,
        next_action: TaskAction,
        schema_name: impl Into<String>,
    ) -> Self {
        Self {
            body_url: Some(body_url.into()),
            blob_digest: Some(blob_digest.into()),
            body_format,
            item_count,
            next_action,
            schema_name: schema_name.into(),
            receiving_org: None,
            receiving_org_svc: None,
        }
    }

    /// A terminated child: no body, no items, nothing further to do.
    /// Used when a filter rejects all of a bundle's content for a receiver.
    pub fn terminated(body_format: ReportFormat, schema_name: impl Into<String>) -> Self {
        Self {
            body_url: None,
            blob_digest: None,
            body_format,
            item_count: 0,
            next_action: TaskAction::None,
            schema_name: schema_name.into(),
            receiving_org: None,
            receiving_org_svc: None,
        }
    }

    /// Scopes the child to one receiver (`org`, `service`).
    pub fn for_receiver(mut self, org: impl Into<String>, svc: impl Into<String>) -> Self {
        self.receiving_org = Some(org.into());
        self.receiving_org_svc = Some(svc.into());
        self
    }

    fn receiver_full_name(&self) -> Option<String> {
        match (&self.receiving_org, &self.receiving_org_svc) {
            (Some(org), Some(svc)) => Some(format!("{org}.{svc}")),
            _ => None,
        }
    }
}

/// Result of recording one stage action.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    pub action: Action,
    pub children: Vec<ReportFile>,
    /// True when the children already existed for this parent+action and the
    /// call was treated as a redelivery (nothing was inserted).
    pub replayed: bool,
}

/// Creates and links report records within single-transaction stage actions.
#[derive(Clone)]
pub struct ReportLineageManager {
    store: Arc<dyn LineageStore>,
}

impl ReportLineageManager {
    pub fn new(store: Arc<dyn LineageStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LineageStore> {
        &self.store
    }

    /// Records one stage action: inserts the action, all child reports,
    /// lineage edges, tasks for live children, and the given action-log
    /// entries in one transaction.
    ///
    /// Redelivery safe: when children already exist for this parent and
    /// action name, nothing is inserted and the existing rows are returned
    /// with `replayed = true`.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::InvariantViolation` when a child's
    /// `next_action` is not a legal successor of `action_name`, and
    /// storage/transaction errors from the backend. Any error leaves zero
    /// visible side effects.
    pub async fn record_children(
        &self,
        parent: &ReportFile,
        action_name: TaskAction,
        specs: Vec<ChildSpec>,
        logs: Vec<ActionLogEntry>,
    ) -> Result<ActionRecord> {
        let existing = self
            .store
            .fetch_children_for_action(parent.report_id, action_name)
            .await?;
        if !existing.is_empty() {
            info!(
                parent = %parent.report_id,
                action = %action_name,
                children = existing.len(),
                "children already recorded for this parent and action; treating as redelivery"
            );
            return self.replay_record(existing).await;
        }

        for spec in &specs {
            if !action_name.can_advance_to(spec.next_action) {
                return Err(LineageError::invariant(format!(
                    "action {action_name} cannot advance a report to {}",
                    spec.next_action
                )));
            }
        }

        let mut tx = self.store.begin().await?;
        let action = tx.insert_action(action_name).await?;
        let now = time::OffsetDateTime::now_utc();

        let mut children = Vec::with_capacity(specs.len());
        for (index, spec) in specs.into_iter().enumerate() {
            let receiver_name = spec.receiver_full_name();
            let child = ReportFile {
                report_id: Uuid::new_v4(),
                action_id: action.action_id,
                next_action: spec.next_action,
                body_url: spec.body_url,
                blob_digest: spec.blob_digest,
                body_format: spec.body_format,
                item_count: spec.item_count,
                schema_name: spec.schema_name,
                schema_topic: parent.schema_topic,
                receiving_org: spec.receiving_org,
                receiving_org_svc: spec.receiving_org_svc,
                created_at: now,
            };
            tx.insert_report(child.clone()).await?;
            tx.insert_lineage(ReportLineage {
                parent_report_id: parent.report_id,
                child_report_id: child.report_id,
                parent_action_id: action.action_id,
                task_index: index as u32,
                created_at: now,
            })
            .await?;
            if !child.is_terminated() {
                tx.insert_task(Task {
                    report_id: child.report_id,
                    next_action: child.next_action,
                    body_format: child.body_format,
                    receiver_name,
                    created_at: now,
                })
                .await?;
            }
            children.push(child);
        }

        for log in logs {
            tx.insert_action_log(log).await?;
        }

        match tx.commit().await {
            Ok(()) => {}
            // A concurrent worker holding the same delivery committed first.
            // The pre-commit check above saw nothing, so re-read the rows the
            // winner wrote and return those instead.
            Err(LineageError::DuplicateAction { .. }) => {
                info!(
                    parent = %parent.report_id,
                    action = %action_name,
                    "lost commit race for this parent and action; treating as redelivery"
                );
                let existing = self
                    .store
                    .fetch_children_for_action(parent.report_id, action_name)
                    .await?;
                if existing.is_empty() {
                    return Err(LineageError::storage(format!(
                        "duplicate-action conflict for parent {} action {action_name} but no committed children found",
                        parent.report_id
                    )));
                }
                return self.replay_record(existing).await;
            }
            Err(e) => return Err(e),
        }
        debug!(
            parent = %parent.report_id,
            action = %action_name,
            action_id = action.action_id,
            children = children.len(),
            "recorded stage action"
        );
        Ok(ActionRecord {
            action,
            children,
            replayed: false,
        })
    }

    /// Builds the redelivery result from already-committed children.
    async fn replay_record(&self, existing: Vec<ReportFile>) -> Result<ActionRecord> {
        let first = existing.first().ok_or_else(|| {
            LineageError::storage("replay requested with no committed children")
        })?;
        let action = self
            .store
            .fetch_action(first.action_id)
            .await?
            .ok_or_else(|| {
                LineageError::storage(format!(
                    "child {} references missing action {}",
                    first.report_id, first.action_id
                ))
            })?;
        Ok(ActionRecord {
            action,
            children: existing,
            replayed: true,
        })
    }

    /// Creates a single child report (convenience over [`record_children`]).
    ///
    /// [`record_children`]: Self::record_children
    pub async fn create_child(
        &self,
        parent: &ReportFile,
        action_name: TaskAction,
        spec: ChildSpec,
        logs: Vec<ActionLogEntry>,
    ) -> Result<(Action, ReportFile)> {
        let record = self
            .record_children(parent, action_name, vec![spec], logs)
            .await?;
        let child = record.children.into_iter().next().ok_or_else(|| {
            LineageError::storage("record_children returned no child for a single spec")
        })?;
        Ok((record.action, child))
    }

    /// Terminates a branch for one receiver: inserts a child with no body,
    /// zero items, `next_action = none`, and no task.
    pub async fn terminate(
        &self,
        parent: &ReportFile,
        action_name: TaskAction,
        receiving_org: &str,
        receiving_org_svc: &str,
        logs: Vec<ActionLogEntry>,
    ) -> Result<ReportFile> {
        let spec = ChildSpec::terminated(parent.body_format, parent.schema_name.clone())
            .for_receiver(receiving_org, receiving_org_svc);
        let (_, child) = self.create_child(parent, action_name, spec, logs).await?;
        Ok(child)
    }

    /// Fetches a parent's children and verifies fan-out cardinality.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::FanOutMismatch` when the count differs from
    /// `expected` — silent under/over-fan-out is a correctness bug.
    pub async fn fetch_children(
        &self,
        parent: &ReportFile,
        expected: usize,
    ) -> Result<Vec<ReportFile>> {
        let children = self.store.fetch_children(parent.report_id).await?;
        if children.len() != expected {
            return Err(LineageError::FanOutMismatch {
                parent: parent.report_id,
                expected,
                actual: children.len(),
            });
        }
        Ok(children)
    }
}

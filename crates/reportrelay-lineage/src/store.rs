//! Storage traits for the lineage store abstraction.
//!
//! All writes for one stage invocation happen inside one
//! [`LineageTransaction`]; a reader must never observe a report without its
//! action or a task without its report.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Action, ActionLogEntry, ReportFile, ReportLineage, Task, TaskAction};

/// The lineage store that all backends must implement.
///
/// Implementations must be thread-safe (`Send + Sync`); many stage workers
/// read and write concurrently across reports and stages.
#[async_trait]
pub trait LineageStore: Send + Sync {
    /// Begins a new transaction. The transaction must be either committed
    /// or rolled back; dropping it uncommitted discards its writes.
    async fn begin(&self) -> Result<Box<dyn LineageTransaction>>;

    /// Reads a report row by id. Returns `None` if it does not exist.
    async fn fetch_report(&self, report_id: Uuid) -> Result<Option<ReportFile>>;

    /// All direct children of a parent report, ordered by task index.
    async fn fetch_children(&self, parent_report_id: Uuid) -> Result<Vec<ReportFile>>;

    /// Children of a parent created by an action with the given name.
    /// Used for idempotent replay detection on message redelivery.
    async fn fetch_children_for_action(
        &self,
        parent_report_id: Uuid,
        action_name: TaskAction,
    ) -> Result<Vec<ReportFile>>;

    async fn fetch_action(&self, action_id: i64) -> Result<Option<Action>>;

    /// Outstanding task for a live report, if its successor has not been
    /// consumed yet.
    async fn fetch_task(&self, report_id: Uuid) -> Result<Option<Task>>;

    /// Action-log entries recorded under one action, in insertion order.
    async fn fetch_action_logs(&self, action_id: i64) -> Result<Vec<ActionLogEntry>>;

    /// Backend name for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// A transaction over the lineage tables.
///
/// Writes are buffered and become visible atomically on `commit`; any error
/// or `rollback` leaves zero visible side effects.
#[async_trait]
pub trait LineageTransaction: Send + Sync {
    /// Inserts the action row for this stage invocation and assigns its id.
    async fn insert_action(&mut self, action_name: TaskAction) -> Result<Action>;

    /// Inserts a report row.
    ///
    /// # Errors
    ///
    /// Returns `LineageError::DuplicateReport` at commit time when the id
    /// already exists.
    async fn insert_report(&mut self, report: ReportFile) -> Result<()>;

    /// Inserts a lineage edge.
    async fn insert_lineage(&mut self, edge: ReportLineage) -> Result<()>;

    /// Inserts a task row for a live child report.
    async fn insert_task(&mut self, task: Task) -> Result<()>;

    /// Appends an action-log entry under this transaction's action.
    async fn insert_action_log(&mut self, entry: ActionLogEntry) -> Result<()>;

    /// Commits all buffered writes atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards all buffered writes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time object-safety checks for the trait seams.
    fn _assert_store_object_safe(_: &dyn LineageStore) {}
    fn _assert_transaction_object_safe(_: &dyn LineageTransaction) {}
}

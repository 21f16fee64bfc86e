//! In-memory lineage backend.
//!
//! Transactions buffer their writes and apply them under one write lock at
//! commit, so concurrent readers never observe a partial stage invocation.
//! Used by the test suite and for local single-process runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{LineageError, Result};
use crate::model::{Action, ActionLogEntry, ReportFile, ReportLineage, Task, TaskAction};
use crate::store::{LineageStore, LineageTransaction};

#[derive(Debug, Default)]
struct Tables {
    actions: HashMap<i64, Action>,
    reports: HashMap<Uuid, ReportFile>,
    lineage: Vec<ReportLineage>,
    tasks: Vec<Task>,
    action_logs: Vec<ActionLogEntry>,
}

/// In-memory lineage store backend.
#[derive(Debug, Default)]
pub struct InMemoryLineageStore {
    tables: Arc<RwLock<Tables>>,
    /// Monotonic action-id sequence. Ids may be burned by rolled-back
    /// transactions, like a database sequence.
    action_counter: Arc<AtomicI64>,
}

impl InMemoryLineageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of committed report rows, for test assertions.
    pub async fn report_count(&self) -> usize {
        self.tables.read().await.reports.len()
    }

    /// Total number of outstanding task rows, for test assertions.
    pub async fn task_count(&self) -> usize {
        self.tables.read().await.tasks.len()
    }
}

#[async_trait]
impl LineageStore for InMemoryLineageStore {
    async fn begin(&self) -> Result<Box<dyn LineageTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            action_counter: Arc::clone(&self.action_counter),
            action: None,
            reports: Vec::new(),
            edges: Vec::new(),
            tasks: Vec::new(),
            logs: Vec::new(),
        }))
    }

    async fn fetch_report(&self, report_id: Uuid) -> Result<Option<ReportFile>> {
        Ok(self.tables.read().await.reports.get(&report_id).cloned())
    }

    async fn fetch_children(&self, parent_report_id: Uuid) -> Result<Vec<ReportFile>> {
        let tables = self.tables.read().await;
        let mut edges: Vec<&ReportLineage> = tables
            .lineage
            .iter()
            .filter(|e| e.parent_report_id == parent_report_id)
            .collect();
        edges.sort_by_key(|e| e.task_index);
        Ok(edges
            .iter()
            .filter_map(|e| tables.reports.get(&e.child_report_id).cloned())
            .collect())
    }

    async fn fetch_children_for_action(
        &self,
        parent_report_id: Uuid,
        action_name: TaskAction,
    ) -> Result<Vec<ReportFile>> {
        let children = self.fetch_children(parent_report_id).await?;
        let tables = self.tables.read().await;
        Ok(children
            .into_iter()
            .filter(|child| {
                tables
                    .actions
                    .get(&child.action_id)
                    .is_some_and(|a| a.action_name == action_name)
            })
            .collect())
    }

    async fn fetch_action(&self, action_id: i64) -> Result<Option<Action>> {
        Ok(self.tables.read().await.actions.get(&action_id).cloned())
    }

    async fn fetch_task(&self, report_id: Uuid) -> Result<Option<Task>> {
        Ok(self
            .tables
            .read()
            .await
            .tasks
            .iter()
            .find(|t| t.report_id == report_id)
            .cloned())
    }

    async fn fetch_action_logs(&self, action_id: i64) -> Result<Vec<ActionLogEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .action_logs
            .iter()
            .filter(|l| l.action_id == Some(action_id))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    action_counter: Arc<AtomicI64>,
    action: Option<Action>,
    reports: Vec<ReportFile>,
    edges: Vec<ReportLineage>,
    tasks: Vec<Task>,
    logs: Vec<ActionLogEntry>,
}

#[async_trait]
impl LineageTransaction for MemoryTransaction {
    async fn insert_action(&mut self, action_name: TaskAction) -> Result<Action> {
        if self.action.is_some() {
            return Err(LineageError::transaction(
                "transaction already carries an action",
            ));
        }
        let action = Action {
            action_id: self.action_counter.fetch_add(1, Ordering::SeqCst) + 1,
            action_name,
            created_at: time::OffsetDateTime::now_utc(),
        };
        self.action = Some(action.clone());
        Ok(action)
    }

    async fn insert_report(&mut self, report: ReportFile) -> Result<()> {
        report.check_invariant()?;
        self.reports.push(report);
        Ok(())
    }

    async fn insert_lineage(&mut self, edge: ReportLineage) -> Result<()> {
        self.edges.push(edge);
        Ok(())
    }

    async fn insert_task(&mut self, task: Task) -> Result<()> {
        self.tasks.push(task);
        Ok(())
    }

    async fn insert_action_log(&mut self, mut entry: ActionLogEntry) -> Result<()> {
        let action = self.action.as_ref().ok_or_else(|| {
            LineageError::transaction("action log inserted before the action row")
        })?;
        entry.action_id = Some(action.action_id);
        self.logs.push(entry);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tables = self.tables.write().await;

        for report in &self.reports {
            if tables.reports.contains_key(&report.report_id) {
                return Err(LineageError::DuplicateReport(report.report_id));
            }
        }

        // Two workers racing the same delivery both pass the pre-commit
        // replay check; the loser must fail here so the caller re-reads the
        // committed rows instead of doubling the fan-out.
        if let Some(action) = &self.action {
            let mut parents: Vec<Uuid> = self.edges.iter().map(|e| e.parent_report_id).collect();
            parents.sort_unstable();
            parents.dedup();
            for parent in parents {
                let conflict = tables.lineage.iter().any(|e| {
                    e.parent_report_id == parent
                        && tables
                            .actions
                            .get(&e.parent_action_id)
                            .is_some_and(|a| a.action_name == action.action_name)
                });
                if conflict {
                    return Err(LineageError::DuplicateAction {
                        parent,
                        action: action.action_name.as_str().to_string(),
                    });
                }
            }
        }

        if let Some(action) = self.action {
            tables.actions.insert(action.action_id, action);
        }
        for report in self.reports {
            tables.reports.insert(report.report_id, report);
        }
        tables.lineage.extend(self.edges);
        tables.tasks.extend(self.tasks);
        tables.action_logs.extend(self.logs);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

//! Report lineage: the parent→child graph recording every transformation a
//! message underwent, plus the outstanding-work `task` rows that join the
//! lineage store to the queue.

pub mod error;
pub mod manager;
pub mod memory;
pub mod model;
pub mod store;

pub use error::{LineageError, Result};
pub use manager::{ActionRecord, ChildSpec, ReportLineageManager};
pub use memory::InMemoryLineageStore;
pub use model::{
    Action, ActionLogEntry, ActionLogLevel, ActionLogScope, ReportFile, ReportLineage, Task,
    TaskAction,
};
pub use store::{LineageStore, LineageTransaction};

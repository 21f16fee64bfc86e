//! Pipeline orchestration: queue messages, collaborator seams, the five
//! stage processors, and the dispatcher that drives them.
//!
//! Each stage processor is a stateless worker invoked once per dequeued
//! message. All lineage writes for one invocation commit in a single
//! transaction before any successor message is enqueued; redelivery of an
//! already-processed message re-sends the successors from the committed
//! rows instead of inserting duplicates.

pub mod blob;
pub mod context;
pub mod dispatch;
pub mod enrich;
pub mod error;
pub mod message;
pub mod queue;
pub mod split;
pub mod stage;

pub use blob::{BlobStore, InMemoryBlobStore};
pub use context::PipelineContext;
pub use dispatch::{DispatchOutcome, PipelineDispatcher};
pub use enrich::{BundleEnricher, SchemaStampEnricher};
pub use error::{PipelineError, Result};
pub use message::{OutboundMessage, QueueMessage, ReportPointer};
pub use queue::{InMemoryQueue, QueueClient};
pub use split::split_items;
pub use stage::{
    ConvertProcessor, EnrichmentProcessor, ReceiverFilterProcessor, RouteProcessor,
    TranslateProcessor,
};

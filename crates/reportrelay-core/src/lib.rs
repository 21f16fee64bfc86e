pub mod bundle;
pub mod codec;
pub mod digest;
pub mod error;
pub mod event;
pub mod topic;

pub use bundle::{Bundle, BundleEntry};
pub use codec::{BundleCodec, FhirJsonCodec, ReportFormat};
pub use digest::{sha256_hex, verify_digest};
pub use error::{CoreError, Result};
pub use event::{BundleDigest, EventSink, PipelineEvent, PipelineEventName, TracingEventSink};
pub use topic::Topic;

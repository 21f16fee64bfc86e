//! Receiver enrichment seam.
//!
//! Enrichment schemas are external transform definitions applied in the
//! receiver's configured order before receiver filtering.

use serde_json::json;

use reportrelay_core::Bundle;

use crate::error::Result;

/// Applies one named enrichment schema to a bundle.
pub trait BundleEnricher: Send + Sync {
    fn apply(&self, schema_name: &str, bundle: &Bundle) -> Result<Bundle>;
}

/// Built-in enricher that stamps the schema name as the source software on
/// the message header. Covers the common "overwrite source-software
/// metadata" enrichment; richer schema-driven transforms plug in behind
/// [`BundleEnricher`].
#[derive(Debug, Default)]
pub struct SchemaStampEnricher;

impl BundleEnricher for SchemaStampEnricher {
    fn apply(&self, schema_name: &str, bundle: &Bundle) -> Result<Bundle> {
        let mut entries = bundle.entries().to_vec();
        for entry in &mut entries {
            if entry.resource_type() == "MessageHeader"
                && let Some(obj) = entry.resource.as_object_mut()
            {
                obj.insert("source".into(), json!({ "software": schema_name }));
            }
        }
        let mut enriched = Bundle::new(entries);
        enriched.id = bundle.id.clone();
        enriched.identifier = bundle.identifier.clone();
        enriched.timestamp = bundle.timestamp.clone();
        Ok(enriched)
    }
}

use serde::{Deserialize, Serialize};

use crate::bundle::Bundle;
use crate::error::{CoreError, Result};

/// Wire format of a report body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportFormat {
    Hl7,
    Fhir,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Hl7 => "HL7",
            ReportFormat::Fhir => "FHIR",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "HL7" => Ok(ReportFormat::Hl7),
            "FHIR" => Ok(ReportFormat::Fhir),
            other => Err(CoreError::UnknownFormat(other.to_string())),
        }
    }

    /// File extension used when building blob keys.
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Hl7 => "hl7",
            ReportFormat::Fhir => "fhir",
        }
    }
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Codec seam between wire bytes and the canonical [`Bundle`].
///
/// The pipeline core never parses HL7v2 or FHIR itself; stage processors
/// call through this trait. Implementations must be deterministic: encoding
/// the same bundle twice yields byte-identical output.
pub trait BundleCodec: Send + Sync {
    /// Decodes one item's bytes into a bundle.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Decode` for malformed content. Decode errors are
    /// item-scoped; callers must not let one abort sibling items.
    fn decode(&self, bytes: &[u8], format: ReportFormat) -> Result<Bundle>;

    /// Encodes a bundle into the given wire format.
    fn encode(&self, bundle: &Bundle, format: ReportFormat) -> Result<Vec<u8>>;
}

/// Built-in codec for FHIR JSON bundles. HL7v2 support comes from an
/// external codec implementation behind the same trait.
#[derive(Debug, Default)]
pub struct FhirJsonCodec;

impl BundleCodec for FhirJsonCodec {
    fn decode(&self, bytes: &[u8], format: ReportFormat) -> Result<Bundle> {
        match format {
            ReportFormat::Fhir => {
                let value: serde_json::Value = serde_json::from_slice(bytes)
                    .map_err(|e| CoreError::decode("FHIR", e.to_string()))?;
                Bundle::from_json(&value)
            }
            ReportFormat::Hl7 => Err(CoreError::decode(
                "HL7",
                "FhirJsonCodec does not decode HL7v2; configure an HL7 codec",
            )),
        }
    }

    fn encode(&self, bundle: &Bundle, format: ReportFormat) -> Result<Vec<u8>> {
        match format {
            ReportFormat::Fhir => {
                serde_json::to_vec(&bundle.to_json()).map_err(CoreError::JsonError)
            }
            ReportFormat::Hl7 => Err(CoreError::encode(
                "HL7",
                "FhirJsonCodec does not encode HL7v2; configure an HL7 codec",
            )),
        }
    }
}

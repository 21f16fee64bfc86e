use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use reportrelay_core::{ReportFormat, Topic};

use crate::{ConfigError, Result};

/// Operational status of a sender or receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    #[default]
    Active,
    Inactive,
    Testing,
}

impl CustomerStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, CustomerStatus::Active | CustomerStatus::Testing)
    }
}

/// A sending party (lab, facility, aggregator). Senders are identified by
/// the blob sub-folder their uploads land in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub name: String,
    pub format: ReportFormat,
    pub topic: Topic,
    /// Conversion schema applied by the Converter for this sender.
    pub schema_name: String,
    #[serde(default)]
    pub customer_status: CustomerStatus,
}

/// A downstream receiver with its ordered filter configuration.
///
/// Filter lists are evaluated in the fixed order jurisdictional → quality →
/// routing → processing-mode → condition; each list combines with AND
/// semantics. Empty lists pass trivially.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receiver {
    pub name: String,
    pub topic: Topic,
    /// Wire format the Translator must produce.
    pub format: ReportFormat,
    #[serde(default)]
    pub customer_status: CustomerStatus,
    #[serde(default)]
    pub jurisdictional_filter: Vec<String>,
    #[serde(default)]
    pub quality_filter: Vec<String>,
    /// Inverts the overall quality-filter verdict; used by receivers that
    /// want the complement set (debug/QA feeds).
    #[serde(default)]
    pub reverse_quality_filter: bool,
    #[serde(default)]
    pub routing_filter: Vec<String>,
    #[serde(default)]
    pub processing_mode_filter: Vec<String>,
    /// Raw condition filter: one expression evaluated per observation with
    /// the observation bound as `%resource`.
    #[serde(default)]
    pub condition_filter: Vec<String>,
    /// Mapped condition filter: allowed condition names after code lookup.
    #[serde(default)]
    pub mapped_condition_filter: Vec<String>,
    /// Ordered enrichment schemas applied before receiver filtering.
    #[serde(default)]
    pub enrichment_schemas: Vec<String>,
    /// Translation schema driving the Translator's reshape, when the target
    /// format needs one.
    #[serde(default)]
    pub translation_schema: Option<String>,
    /// Skip translation and batching; forward the original content straight
    /// to the send stage.
    #[serde(default)]
    pub is_send_original: bool,
}

impl Receiver {
    pub fn has_enrichments(&self) -> bool {
        !self.enrichment_schemas.is_empty()
    }
}

/// Reference to a receiver in `org.receiverName` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiverRef {
    pub organization_name: String,
    pub receiver_name: String,
}

impl ReceiverRef {
    pub fn new(organization_name: impl Into<String>, receiver_name: impl Into<String>) -> Self {
        Self {
            organization_name: organization_name.into(),
            receiver_name: receiver_name.into(),
        }
    }

    /// Parses `org.receiverName`. The receiver name may itself contain dots;
    /// only the first dot separates the organization.
    pub fn parse(full_name: &str) -> Result<Self> {
        match full_name.split_once('.') {
            Some((org, recv)) if !org.is_empty() && !recv.is_empty() => {
                Ok(Self::new(org, recv))
            }
            _ => Err(ConfigError::UnknownReceiver(full_name.to_string())),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.organization_name, self.receiver_name)
    }
}

impl std::fmt::Display for ReceiverRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.organization_name, self.receiver_name)
    }
}

/// One organization with its senders and receivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub senders: Vec<Sender>,
    #[serde(default)]
    pub receivers: Vec<Receiver>,
}

/// Immutable snapshot of all organization settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    #[serde(default)]
    pub organizations: Vec<Organization>,
}

impl SettingsSnapshot {
    pub fn new(organizations: Vec<Organization>) -> Result<Self> {
        let snapshot = Self { organizations };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Loads a snapshot from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let snapshot: SettingsSnapshot =
            toml::from_str(text).map_err(|e| ConfigError::parse(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Loads a snapshot from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for org in &self.organizations {
            for receiver in &org.receivers {
                let full = format!("{}.{}", org.name, receiver.name);
                if !seen.insert(full.clone()) {
                    return Err(ConfigError::validation(format!(
                        "duplicate receiver {full}"
                    )));
                }
                if !receiver.condition_filter.is_empty()
                    && !receiver.mapped_condition_filter.is_empty()
                {
                    // Mutually exclusive; the raw filter wins at evaluation
                    // time, so flag the configuration early.
                    warn!(
                        receiver = %full,
                        "both condition_filter and mapped_condition_filter configured; \
                         the raw condition filter takes precedence"
                    );
                }
            }
        }
        Ok(())
    }

    /// All active receivers subscribed to `topic`, paired with their refs,
    /// in declaration order. Inactive receivers are included so the Router
    /// can terminate their branches explicitly; callers check
    /// `customer_status`.
    pub fn receivers_for_topic(&self, topic: Topic) -> Vec<(ReceiverRef, &Receiver)> {
        self.organizations
            .iter()
            .flat_map(|org| {
                org.receivers
                    .iter()
                    .filter(move |r| r.topic == topic)
                    .map(move |r| (ReceiverRef::new(org.name.clone(), r.name.clone()), r))
            })
            .collect()
    }

    /// Looks up a receiver by its `org.receiverName` reference.
    pub fn find_receiver(&self, receiver_ref: &ReceiverRef) -> Result<&Receiver> {
        self.organizations
            .iter()
            .find(|org| org.name == receiver_ref.organization_name)
            .and_then(|org| {
                org.receivers
                    .iter()
                    .find(|r| r.name == receiver_ref.receiver_name)
            })
            .ok_or_else(|| ConfigError::UnknownReceiver(receiver_ref.full_name()))
    }

    /// Looks up a sender by the blob sub-folder name (`org.senderName`).
    pub fn find_sender(&self, full_name: &str) -> Result<&Sender> {
        let (org_name, sender_name) = full_name
            .split_once('.')
            .ok_or_else(|| ConfigError::UnknownSender(full_name.to_string()))?;
        self.organizations
            .iter()
            .find(|org| org.name == org_name)
            .and_then(|org| org.senders.iter().find(|s| s.name == sender_name))
            .ok_or_else(|| ConfigError::UnknownSender(full_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[organizations]]
        name = "tx-doh"

        [[organizations.receivers]]
        name = "elr"
        topic = "full-elr"
        format = "HL7"
        jurisdictional_filter = ["Patient.address.state = 'TX'"]
        quality_filter = ["exists(Patient.name)"]
        condition_filter = ["%resource.code.coding.code = '94558-5'"]

        [[organizations]]
        name = "strac"

        [[organizations.senders]]
        name = "default"
        format = "HL7"
        topic = "full-elr"
        schema_name = "strac/covid-19"

        [[organizations.receivers]]
        name = "debug"
        topic = "full-elr"
        format = "FHIR"
        customer_status = "inactive"
        reverse_quality_filter = true
    "#;

    #[test]
    fn test_load_from_toml() {
        let snapshot = SettingsSnapshot::from_toml_str(SAMPLE).unwrap();
        assert_eq!(snapshot.organizations.len(), 2);

        let receiver = snapshot
            .find_receiver(&ReceiverRef::new("tx-doh", "elr"))
            .unwrap();
        assert_eq!(receiver.format, ReportFormat::Hl7);
        assert_eq!(receiver.jurisdictional_filter.len(), 1);
        assert!(!receiver.reverse_quality_filter);

        let sender = snapshot.find_sender("strac.default").unwrap();
        assert_eq!(sender.schema_name, "strac/covid-19");
        assert!(sender.customer_status.is_active());
    }

    #[test]
    fn test_receivers_for_topic() {
        let snapshot = SettingsSnapshot::from_toml_str(SAMPLE).unwrap();
        let receivers = snapshot.receivers_for_topic(Topic::FullElr);
        assert_eq!(receivers.len(), 2);
        assert_eq!(receivers[0].0.full_name(), "tx-doh.elr");
        assert_eq!(receivers[1].0.full_name(), "strac.debug");
        assert!(snapshot.receivers_for_topic(Topic::Test).is_empty());
    }

    #[test]
    fn test_inactive_receiver_status() {
        let snapshot = SettingsSnapshot::from_toml_str(SAMPLE).unwrap();
        let (_, debug) = snapshot
            .receivers_for_topic(Topic::FullElr)
            .into_iter()
            .find(|(r, _)| r.receiver_name == "debug")
            .unwrap();
        assert!(!debug.customer_status.is_active());
        assert!(debug.reverse_quality_filter);
    }

    #[test]
    fn test_unknown_lookups_fail() {
        let snapshot = SettingsSnapshot::from_toml_str(SAMPLE).unwrap();
        assert!(matches!(
            snapshot.find_receiver(&ReceiverRef::new("nowhere", "elr")),
            Err(ConfigError::UnknownReceiver(_))
        ));
        assert!(matches!(
            snapshot.find_sender("nowhere.default"),
            Err(ConfigError::UnknownSender(_))
        ));
        assert!(matches!(
            snapshot.find_sender("no-dot"),
            Err(ConfigError::UnknownSender(_))
        ));
    }

    #[test]
    fn test_duplicate_receiver_rejected() {
        let dup = r#"
            [[organizations]]
            name = "a"
            [[organizations.receivers]]
            name = "r"
            topic = "test"
            format = "FHIR"
            [[organizations.receivers]]
            name = "r"
            topic = "test"
            format = "HL7"
        "#;
        assert!(matches!(
            SettingsSnapshot::from_toml_str(dup),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_receiver_ref_parse() {
        let r = ReceiverRef::parse("tx-doh.elr.secondary").unwrap();
        assert_eq!(r.organization_name, "tx-doh");
        assert_eq!(r.receiver_name, "elr.secondary");
        assert!(ReceiverRef::parse("nodot").is_err());
        assert!(ReceiverRef::parse(".x").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organizations.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let snapshot = SettingsSnapshot::load(&path).unwrap();
        assert_eq!(snapshot.organizations.len(), 2);
    }
}

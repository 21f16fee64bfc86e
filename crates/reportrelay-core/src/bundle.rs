//! Canonical in-memory clinical bundle.
//!
//! A [`Bundle`] is the pipeline's internal representation of one clinical
//! message: an ordered list of resource entries (JSON objects) tied to a
//! patient/specimen. Order is load-bearing: pruning must delete entries
//! without reordering or rewriting the survivors, so that an all-pass
//! filter round-trips to a value equal to its input.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use crate::error::{CoreError, Result};

/// Coding system for HL7 table 0936 (observation subtype), which marks
/// ask-at-order-entry observations.
const AOE_CODING_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v2-0936";

/// Resource types that survive pruning even when only a removed observation
/// referenced them.
const PRUNE_PROTECTED_TYPES: &[&str] = &["Patient", "MessageHeader", "Provenance"];

/// One entry in a bundle: an optional `fullUrl` plus the resource itself.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    pub full_url: Option<String>,
    pub resource: Value,
}

impl BundleEntry {
    pub fn new(resource: Value) -> Self {
        Self {
            full_url: None,
            resource,
        }
    }

    /// `resourceType` of the entry, empty string when absent.
    pub fn resource_type(&self) -> &str {
        self.resource
            .get("resourceType")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Resource `id`, if present.
    pub fn resource_id(&self) -> Option<&str> {
        self.resource.get("id").and_then(Value::as_str)
    }

    /// Local reference key in `Type/id` form, used for reference matching.
    pub fn reference_key(&self) -> Option<String> {
        let id = self.resource_id()?;
        let rt = self.resource_type();
        if rt.is_empty() {
            return None;
        }
        Some(format!("{rt}/{id}"))
    }
}

/// An ordered clinical bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    pub id: Option<String>,
    /// Message identifier (FHIR `Bundle.identifier.value`), carried into
    /// events so dashboards can correlate without re-parsing.
    pub identifier: Option<String>,
    pub timestamp: Option<String>,
    entries: Vec<BundleEntry>,
}

impl Bundle {
    pub fn new(entries: Vec<BundleEntry>) -> Self {
        Self {
            id: None,
            identifier: None,
            timestamp: None,
            entries,
        }
    }

    /// Parses a FHIR JSON `Bundle` value.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidBundle` if the value is not an object with
    /// `resourceType == "Bundle"`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::invalid_bundle("bundle is not a JSON object"))?;
        match obj.get("resourceType").and_then(Value::as_str) {
            Some("Bundle") => {}
            other => {
                return Err(CoreError::invalid_bundle(format!(
                    "expected resourceType Bundle, got {other:?}"
                )));
            }
        }

        let entries = obj
            .get("entry")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|e| {
                        let resource = e.get("resource")?.clone();
                        Some(BundleEntry {
                            full_url: e.get("fullUrl").and_then(Value::as_str).map(String::from),
                            resource,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id: obj.get("id").and_then(Value::as_str).map(String::from),
            identifier: obj
                .get("identifier")
                .and_then(|i| i.get("value"))
                .and_then(Value::as_str)
                .map(String::from),
            timestamp: obj
                .get("timestamp")
                .and_then(Value::as_str)
                .map(String::from),
            entries,
        })
    }

    /// Serializes back to a FHIR JSON `Bundle` value. Entry order is
    /// preserved exactly; serde_json's map ordering makes the output
    /// deterministic for a given bundle.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("resourceType".into(), json!("Bundle"));
        if let Some(id) = &self.id {
            obj.insert("id".into(), json!(id));
        }
        if let Some(identifier) = &self.identifier {
            obj.insert("identifier".into(), json!({ "value": identifier }));
        }
        obj.insert("type".into(), json!("message"));
        if let Some(ts) = &self.timestamp {
            obj.insert("timestamp".into(), json!(ts));
        }
        let entries: Vec<Value> = self
            .entries
            .iter()
            .map(|e| {
                let mut entry = Map::new();
                if let Some(url) = &e.full_url {
                    entry.insert("fullUrl".into(), json!(url));
                }
                entry.insert("resource".into(), e.resource.clone());
                Value::Object(entry)
            })
            .collect();
        obj.insert("entry".into(), Value::Array(entries));
        Value::Object(obj)
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All observation entries, in bundle order.
    pub fn observations(&self) -> impl Iterator<Item = &BundleEntry> {
        self.entries
            .iter()
            .filter(|e| e.resource_type() == "Observation")
    }

    /// Reference keys (`Observation/id`) of all observations, in order.
    pub fn observation_keys(&self) -> Vec<String> {
        self.observations()
            .filter_map(BundleEntry::reference_key)
            .collect()
    }

    /// First resource of the given type, if any.
    pub fn first_of_type(&self, resource_type: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|e| e.resource_type() == resource_type)
            .map(|e| &e.resource)
    }

    /// Primary test code (`code.coding[0].code`) of every observation.
    pub fn observation_codes(&self) -> Vec<String> {
        self.observations()
            .filter_map(|e| observation_code(&e.resource))
            .collect()
    }

    /// State of the first patient address, used for jurisdiction summaries.
    pub fn patient_state(&self) -> Option<String> {
        self.first_of_type("Patient")?
            .get("address")?
            .get(0)?
            .get("state")?
            .as_str()
            .map(String::from)
    }

    /// Name of the first `Organization` entry (ordering facility by
    /// convention in converted messages).
    pub fn ordering_facility_name(&self) -> Option<String> {
        self.first_of_type("Organization")?
            .get("name")?
            .as_str()
            .map(String::from)
    }

    /// Count of observations that are real results rather than AOE answers.
    pub fn non_aoe_observation_count(&self) -> usize {
        self.observations()
            .filter(|e| !is_aoe_observation(&e.resource))
            .count()
    }

    /// Returns a new bundle retaining only the observations whose reference
    /// key appears in `keep`, plus every non-observation entry that is still
    /// referenced from a surviving entry (or is a protected root type).
    ///
    /// Survivors keep their order and content; references to removed
    /// observations are dropped from surviving `DiagnosticReport.result`
    /// lists so the output never dangles. Applying the same `keep` set twice
    /// yields the identical bundle (pruning is a fixed point).
    pub fn prune_observations(&self, keep: &BTreeSet<String>) -> Bundle {
        let removed: BTreeSet<String> = self
            .observations()
            .filter_map(BundleEntry::reference_key)
            .filter(|key| !keep.contains(key))
            .collect();

        if removed.is_empty() {
            return self.clone();
        }

        // Entries left after deleting the rejected observations.
        let survivors: Vec<BundleEntry> = self
            .entries
            .iter()
            .filter(|e| {
                e.resource_type() != "Observation"
                    || e.reference_key().is_none_or(|key| keep.contains(&key))
            })
            .cloned()
            .collect();

        // References held by removed observations are orphan candidates.
        let mut orphan_candidates = BTreeSet::new();
        for entry in self.observations() {
            if let Some(key) = entry.reference_key()
                && removed.contains(&key)
            {
                collect_references(&entry.resource, &mut orphan_candidates);
            }
        }

        let mut still_referenced = BTreeSet::new();
        for entry in &survivors {
            collect_references(&entry.resource, &mut still_referenced);
        }

        let mut pruned: Vec<BundleEntry> = survivors
            .into_iter()
            .filter(|e| {
                let Some(key) = e.reference_key() else {
                    return true;
                };
                if PRUNE_PROTECTED_TYPES.contains(&e.resource_type()) {
                    return true;
                }
                !(orphan_candidates.contains(&key) && !still_referenced.contains(&key))
            })
            .collect();

        for entry in &mut pruned {
            if entry.resource_type() == "DiagnosticReport" {
                drop_result_references(&mut entry.resource, &removed);
            }
        }

        Bundle {
            id: self.id.clone(),
            identifier: self.identifier.clone(),
            timestamp: self.timestamp.clone(),
            entries: pruned,
        }
    }
}

/// Primary code of an observation (`code.coding[0].code`).
pub fn observation_code(observation: &Value) -> Option<String> {
    observation
        .get("code")?
        .get("coding")?
        .get(0)?
        .get("code")?
        .as_str()
        .map(String::from)
}

/// An observation is ask-at-order-entry when its coding carries the HL7
/// v2 table 0936 system, or its category names AOE explicitly.
pub fn is_aoe_observation(observation: &Value) -> bool {
    let coding_is_aoe = observation
        .get("code")
        .and_then(|c| c.get("coding"))
        .and_then(Value::as_array)
        .is_some_and(|codings| {
            codings.iter().any(|coding| {
                coding.get("system").and_then(Value::as_str) == Some(AOE_CODING_SYSTEM)
            })
        });
    if coding_is_aoe {
        return true;
    }
    observation
        .get("category")
        .and_then(Value::as_array)
        .is_some_and(|cats| {
            cats.iter()
                .filter_map(|cat| cat.get("coding").and_then(Value::as_array))
                .flatten()
                .any(|coding| coding.get("code").and_then(Value::as_str) == Some("AOE"))
        })
}

/// Walks a resource and collects every `{"reference": "Type/id"}` target.
pub fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get("reference").and_then(Value::as_str) {
                out.insert(reference.to_string());
            }
            for v in map.values() {
                collect_references(v, out);
            }
        }
        Value::Array(arr) => {
            for v in arr {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

fn drop_result_references(report: &mut Value, removed: &BTreeSet<String>) {
    if let Some(results) = report.get_mut("result").and_then(Value::as_array_mut) {
        results.retain(|r| {
            r.get("reference")
                .and_then(Value::as_str)
                .is_none_or(|reference| !removed.contains(reference))
        });
    }
}

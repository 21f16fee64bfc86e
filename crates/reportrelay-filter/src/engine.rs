//! Ordered filter-chain evaluation.
//!
//! Stages run strictly in order per receiver and short-circuit on the first
//! failure, so the audit trail always records a single cause:
//!
//! 1. jurisdictional (report-level, failure never logged)
//! 2. quality (report-level, honors `reverse_quality_filter`)
//! 3. routing (report-level)
//! 4. processing mode (report-level)
//! 5. condition / mapped condition (item-level, prunes the bundle)

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use reportrelay_config::{Receiver, ReceiverRef};
use reportrelay_core::Bundle;

use crate::eval::{ConditionLookup, FilterEvaluator};
use crate::result::{FilterResult, FilterType};
use crate::Result;

/// Outcome of the full chain for one receiver.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub accepted: bool,
    /// Present iff accepted: the bundle with non-matching observations (and
    /// their now-orphaned references) removed.
    pub pruned_bundle: Option<Bundle>,
    /// At most one entry: the first failing stage.
    pub failures: Vec<FilterResult>,
}

/// Outcome of the item-level condition stage alone.
#[derive(Debug, Clone)]
pub enum ConditionOutcome {
    Accepted(Bundle),
    Rejected(FilterResult),
}

/// Evaluates a receiver's ordered filter configuration against bundles.
#[derive(Clone)]
pub struct FilterChainEngine {
    evaluator: Arc<dyn FilterEvaluator>,
    lookup: Arc<dyn ConditionLookup>,
}

impl FilterChainEngine {
    pub fn new(evaluator: Arc<dyn FilterEvaluator>, lookup: Arc<dyn ConditionLookup>) -> Self {
        Self { evaluator, lookup }
    }

    /// Runs the full chain (stages 1–5).
    pub fn apply(
        &self,
        bundle: &Bundle,
        receiver_ref: &ReceiverRef,
        receiver: &Receiver,
    ) -> Result<FilterOutcome> {
        if let Some(failure) = self.apply_report_filters(bundle, receiver_ref, receiver)? {
            return Ok(FilterOutcome {
                accepted: false,
                pruned_bundle: None,
                failures: vec![failure],
            });
        }
        match self.apply_condition_filter(bundle, receiver_ref, receiver)? {
            ConditionOutcome::Accepted(pruned) => Ok(FilterOutcome {
                accepted: true,
                pruned_bundle: Some(pruned),
                failures: Vec::new(),
            }),
            ConditionOutcome::Rejected(failure) => Ok(FilterOutcome {
                accepted: false,
                pruned_bundle: None,
                failures: vec![failure],
            }),
        }
    }

    /// Runs the report-level stages (1–4). Returns the first failure, or
    /// `None` when the receiver should get this report.
    pub fn apply_report_filters(
        &self,
        bundle: &Bundle,
        receiver_ref: &ReceiverRef,
        receiver: &Receiver,
    ) -> Result<Option<FilterResult>> {
        let receiver_name = receiver_ref.full_name();

        if !self.all_pass(&receiver.jurisdictional_filter, bundle)? {
            debug!(receiver = %receiver_name, "jurisdictional filter did not match");
            return Ok(Some(FilterResult::failure(
                FilterType::JurisdictionalFilter,
                receiver.jurisdictional_filter.clone(),
                receiver_name,
            )));
        }

        let mut quality_pass = self.all_pass(&receiver.quality_filter, bundle)?;
        if receiver.reverse_quality_filter {
            quality_pass = !quality_pass;
        }
        if !quality_pass {
            return Ok(Some(
                FilterResult::failure(
                    FilterType::QualityFilter,
                    receiver.quality_filter.clone(),
                    receiver_name,
                )
                .with_failing_observations(bundle.observation_keys()),
            ));
        }

        if !self.all_pass(&receiver.routing_filter, bundle)? {
            return Ok(Some(
                FilterResult::failure(
                    FilterType::RoutingFilter,
                    receiver.routing_filter.clone(),
                    receiver_name,
                )
                .with_failing_observations(bundle.observation_keys()),
            ));
        }

        if !self.all_pass(&receiver.processing_mode_filter, bundle)? {
            return Ok(Some(
                FilterResult::failure(
                    FilterType::ProcessingModeFilter,
                    receiver.processing_mode_filter.clone(),
                    receiver_name,
                )
                .with_failing_observations(bundle.observation_keys()),
            ));
        }

        Ok(None)
    }

    /// Runs the item-level condition stage (5).
    ///
    /// Raw and mapped condition filters are mutually exclusive per receiver;
    /// when both are configured the raw filter wins. After pruning, a bundle
    /// with zero non-AOE observations left is rejected outright: AOE-only
    /// bundles are never forwarded.
    pub fn apply_condition_filter(
        &self,
        bundle: &Bundle,
        receiver_ref: &ReceiverRef,
        receiver: &Receiver,
    ) -> Result<ConditionOutcome> {
        let receiver_name = receiver_ref.full_name();

        let (filter_type, expressions, keep, failing) =
            if !receiver.condition_filter.is_empty() {
                if !receiver.mapped_condition_filter.is_empty() {
                    warn!(
                        receiver = %receiver_name,
                        "ignoring mapped_condition_filter; raw condition filter takes precedence"
                    );
                }
                let (keep, failing) = self.evaluate_raw_condition(bundle, receiver)?;
                (
                    FilterType::ConditionFilter,
                    receiver.condition_filter.clone(),
                    keep,
                    failing,
                )
            } else if !receiver.mapped_condition_filter.is_empty() {
                let (keep, failing) = self.evaluate_mapped_condition(bundle, receiver)?;
                (
                    FilterType::MappedConditionFilter,
                    vec![format!(
                        "mappedConditionFilter: [{}]",
                        receiver.mapped_condition_filter.join(", ")
                    )],
                    keep,
                    failing,
                )
            } else {
                return Ok(ConditionOutcome::Accepted(bundle.clone()));
            };

        let pruned = bundle.prune_observations(&keep);
        if pruned.non_aoe_observation_count() == 0 {
            debug!(
                receiver = %receiver_name,
                filter_type = %filter_type,
                "no substantive observations left after condition filtering"
            );
            return Ok(ConditionOutcome::Rejected(
                FilterResult::failure(filter_type, expressions, receiver_name)
                    .with_failing_observations(failing),
            ));
        }
        Ok(ConditionOutcome::Accepted(pruned))
    }

    /// AND across the expression list; empty lists pass trivially.
    fn all_pass(&self, expressions: &[String], bundle: &Bundle) -> Result<bool> {
        for expression in expressions {
            if !self.evaluator.evaluate(expression, bundle)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Raw condition filter: an observation is kept when any expression
    /// matches it (the list enumerates the conditions the receiver wants).
    fn evaluate_raw_condition(
        &self,
        bundle: &Bundle,
        receiver: &Receiver,
    ) -> Result<(BTreeSet<String>, Vec<String>)> {
        let mut keep = BTreeSet::new();
        let mut failing = Vec::new();
        for entry in bundle.observations() {
            let Some(key) = entry.reference_key() else {
                continue;
            };
            let mut matched = false;
            for expression in &receiver.condition_filter {
                if self
                    .evaluator
                    .evaluate_for_resource(expression, bundle, &entry.resource)?
                {
                    matched = true;
                    break;
                }
            }
            if matched {
                keep.insert(key);
            } else {
                failing.push(key);
            }
        }
        Ok((keep, failing))
    }

    /// Mapped condition filter: an observation is kept when its test code
    /// maps to a condition in the receiver's allowed set. Unmapped codes do
    /// not match.
    fn evaluate_mapped_condition(
        &self,
        bundle: &Bundle,
        receiver: &Receiver,
    ) -> Result<(BTreeSet<String>, Vec<String>)> {
        let mut keep = BTreeSet::new();
        let mut failing = Vec::new();
        for entry in bundle.observations() {
            let Some(key) = entry.reference_key() else {
                continue;
            };
            let condition = reportrelay_core::bundle::observation_code(&entry.resource)
                .map(|code| self.lookup.lookup(&code))
                .transpose()?
                .flatten();
            let allowed = condition
                .as_deref()
                .is_some_and(|c| receiver.mapped_condition_filter.iter().any(|m| m == c));
            if allowed {
                keep.insert(key);
            } else {
                failing.push(key);
            }
        }
        Ok((keep, failing))
    }
}

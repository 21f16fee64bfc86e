//! Expression evaluation seams and the built-in minimal evaluator.
//!
//! The pipeline never parses filter expressions itself; it orchestrates
//! calls through [`FilterEvaluator`] and [`ConditionLookup`]. A full
//! FHIRPath engine can sit behind these traits; the bundled
//! [`SimpleEvaluator`] covers the comparison subset the stock filter
//! configurations use:
//!
//! - `true` / `false`
//! - `exists(<path>)`
//! - `<path> = '<literal>'` and `<path> != '<literal>'`
//! - `<path> in ('<a>', '<b>', ...)`
//!
//! A path is dot-separated: the first segment is either a resource type
//! (matching every resource of that type in the bundle) or `%resource`
//! (the bound context resource for item-level filters); later segments
//! index object fields, flattening arrays as they go. Comparisons are
//! existential: `=` passes when any resolved value matches.

use serde_json::Value;

use reportrelay_core::Bundle;

use crate::{FilterError, Result};

/// Evaluates a boolean predicate string against a bundle, optionally with a
/// single resource bound as `%resource`.
pub trait FilterEvaluator: Send + Sync {
    /// Evaluates a report-level expression against the whole bundle.
    fn evaluate(&self, expression: &str, bundle: &Bundle) -> Result<bool>;

    /// Evaluates an item-level expression with `resource` bound as
    /// `%resource`.
    fn evaluate_for_resource(
        &self,
        expression: &str,
        bundle: &Bundle,
        resource: &Value,
    ) -> Result<bool>;
}

/// Test-code → condition-name mapping used by mapped condition filters.
pub trait ConditionLookup: Send + Sync {
    /// Returns the condition mapped to `code`, `None` when the code is
    /// unmapped.
    ///
    /// # Errors
    ///
    /// Returns `FilterError::Lookup` only for infrastructure failures, not
    /// for unmapped codes.
    fn lookup(&self, code: &str) -> Result<Option<String>>;
}

/// In-memory condition lookup table.
#[derive(Debug, Default)]
pub struct TableConditionLookup {
    table: std::collections::HashMap<String, String>,
}

impl TableConditionLookup {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            table: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl ConditionLookup for TableConditionLookup {
    fn lookup(&self, code: &str) -> Result<Option<String>> {
        Ok(self.table.get(code).cloned())
    }
}

/// The built-in minimal evaluator.
#[derive(Debug, Default)]
pub struct SimpleEvaluator;

impl FilterEvaluator for SimpleEvaluator {
    fn evaluate(&self, expression: &str, bundle: &Bundle) -> Result<bool> {
        evaluate_expression(expression, bundle, None)
    }

    fn evaluate_for_resource(
        &self,
        expression: &str,
        bundle: &Bundle,
        resource: &Value,
    ) -> Result<bool> {
        evaluate_expression(expression, bundle, Some(resource))
    }
}

fn evaluate_expression(expression: &str, bundle: &Bundle, resource: Option<&Value>) -> Result<bool> {
    let expr = expression.trim();
    match expr {
        "" => Err(FilterError::invalid_expression(expression, "empty expression")),
        "true" => Ok(true),
        "false" => Ok(false),
        _ => {
            if let Some(inner) = expr
                .strip_prefix("exists(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                let values = resolve_path(inner.trim(), bundle, resource, expression)?;
                return Ok(!values.is_empty());
            }
            if let Some((path, list)) = split_operator(expr, " in ") {
                let wanted = parse_literal_list(list, expression)?;
                let values = scalars(&resolve_path(path, bundle, resource, expression)?);
                return Ok(values.iter().any(|v| wanted.iter().any(|w| w == v)));
            }
            if let Some((path, literal)) = split_operator(expr, "!=") {
                let literal = parse_literal(literal, expression)?;
                let values = scalars(&resolve_path(path, bundle, resource, expression)?);
                return Ok(!values.is_empty() && values.iter().all(|v| *v != literal));
            }
            if let Some((path, literal)) = split_operator(expr, "=") {
                let literal = parse_literal(literal, expression)?;
                let values = scalars(&resolve_path(path, bundle, resource, expression)?);
                return Ok(values.iter().any(|v| *v == literal));
            }
            Err(FilterError::invalid_expression(
                expression,
                "unsupported expression form",
            ))
        }
    }
}

fn split_operator<'a>(expr: &'a str, op: &str) -> Option<(&'a str, &'a str)> {
    expr.split_once(op)
        .map(|(lhs, rhs)| (lhs.trim(), rhs.trim()))
}

fn parse_literal(text: &str, expression: &str) -> Result<String> {
    text.strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .map(String::from)
        .ok_or_else(|| {
            FilterError::invalid_expression(expression, "expected a single-quoted literal")
        })
}

fn parse_literal_list(text: &str, expression: &str) -> Result<Vec<String>> {
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(|| {
            FilterError::invalid_expression(expression, "expected a parenthesized list")
        })?;
    inner
        .split(',')
        .map(|item| parse_literal(item.trim(), expression))
        .collect()
}

/// Resolves a dot path to the values it selects, arrays flattened. Objects
/// are kept: `exists()` must see them even though they never compare equal
/// to a literal.
fn resolve_path(
    path: &str,
    bundle: &Bundle,
    resource: Option<&Value>,
    expression: &str,
) -> Result<Vec<Value>> {
    let mut segments = path.split('.');
    let head = segments
        .next()
        .ok_or_else(|| FilterError::invalid_expression(expression, "empty path"))?;

    let mut current: Vec<Value> = if head == "%resource" {
        let resource = resource.ok_or_else(|| {
            FilterError::evaluation(expression, "%resource used outside an item-level filter")
        })?;
        vec![resource.clone()]
    } else {
        bundle
            .entries()
            .iter()
            .filter(|e| e.resource_type() == head)
            .map(|e| e.resource.clone())
            .collect()
    };

    for segment in segments {
        let mut next = Vec::new();
        for value in current {
            collect_field(&value, segment, &mut next);
        }
        current = next;
    }

    Ok(current)
}

fn collect_field(value: &Value, field: &str, out: &mut Vec<Value>) {
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(field) {
                match v {
                    Value::Array(arr) => out.extend(arr.iter().cloned()),
                    // Explicit null is an absent field.
                    Value::Null => {}
                    other => out.push(other.clone()),
                }
            }
        }
        Value::Array(arr) => {
            for v in arr {
                collect_field(v, field, out);
            }
        }
        _ => {}
    }
}

/// Renders resolved values as comparison strings. Objects never match a
/// literal, so they drop out here.
fn scalars(values: &[Value]) -> Vec<String> {
    values.iter().flat_map(scalar_strings).collect()
}

fn scalar_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        Value::Array(arr) => arr.iter().flat_map(scalar_strings).collect(),
        Value::Object(_) => vec![],
        Value::Null => vec![],
    }
}

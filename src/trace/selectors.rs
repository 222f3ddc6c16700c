//! Label selectors
//!
//! Matching and rendering use [`kube::core::Selector`]. Objects carry the
//! structured form (`matchLabels` / `matchExpressions`), which converts through
//! the k8s-openapi `LabelSelector`. List calls carry the string syntax
//! (`app=api,tier!=db,env in (prod,staging),!canary`); kube only renders that
//! form, so [`parse`] reads it back for clusters that filter in-process.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
pub use kube::core::{Expression, ParseExpressionError, Selector, SelectorExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("invalid selector term '{0}'")]
    InvalidTerm(String),
    #[error("malformed label selector: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Expression(#[from] ParseExpressionError),
}

/// Equality selector from a plain label map (Service `spec.selector`)
pub fn from_map(labels: &BTreeMap<String, String>) -> Selector {
    labels.clone().into_iter().collect()
}

/// Structured selector (`{matchLabels, matchExpressions}`)
pub fn from_value(value: &Value) -> Result<Selector, SelectorError> {
    let spec: LabelSelector = serde_json::from_value(value.clone())?;
    Ok(Selector::try_from(spec)?)
}

/// Parse the kubectl selector string syntax
pub fn parse(input: &str) -> Result<Selector, SelectorError> {
    split_terms(input)
        .into_iter()
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(parse_term)
        .collect()
}

/// Split on commas that are not inside a parenthesised value set
fn split_terms(input: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&input[start..]);
    terms
}

fn parse_set(term: &str, rest: &str) -> Result<BTreeSet<String>, SelectorError> {
    let inner = rest
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| SelectorError::InvalidTerm(term.to_string()))?;
    Ok(inner
        .split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect())
}

fn parse_term(term: &str) -> Result<Expression, SelectorError> {
    let key = |key: &str| {
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            Err(SelectorError::InvalidTerm(term.to_string()))
        } else {
            Ok(key.to_string())
        }
    };

    if let Some(rest) = term.strip_prefix('!') {
        return Ok(Expression::DoesNotExist(key(rest)?));
    }
    if let Some((k, value)) = term.split_once("!=") {
        return Ok(Expression::NotEqual(key(k)?, value.trim().to_string()));
    }
    if let Some((k, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Expression::Equal(key(k)?, value.trim().to_string()));
    }
    if let Some((k, rest)) = term.split_once(" notin ") {
        return Ok(Expression::NotIn(key(k)?, parse_set(term, rest)?));
    }
    if let Some((k, rest)) = term.split_once(" in ") {
        return Ok(Expression::In(key(k)?, parse_set(term, rest)?));
    }
    Ok(Expression::Exists(key(term)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_and_match_string_syntax() {
        let selector = parse("app=api, env in (prod,staging),!canary,tier").unwrap();
        assert_eq!(selector.to_string(), "app=api,env in (prod,staging),!canary,tier");
        assert!(selector.matches(&labels(&[("app", "api"), ("env", "prod"), ("tier", "be")])));
        assert!(!selector.matches(&labels(&[("app", "api"), ("env", "dev"), ("tier", "be")])));
        assert!(!selector.matches(&labels(&[
            ("app", "api"),
            ("env", "prod"),
            ("tier", "be"),
            ("canary", "true")
        ])));
    }

    #[test]
    fn test_rendered_selector_parses_back() {
        let selector = from_value(&json!({
            "matchLabels": {"app": "api"},
            "matchExpressions": [{"key": "env", "operator": "NotIn", "values": ["prod"]}]
        }))
        .unwrap();
        assert_eq!(parse(&selector.to_string()).unwrap(), selector);
    }

    #[test]
    fn test_not_in_matches_missing_label() {
        let selector = parse("env notin (prod)").unwrap();
        assert!(selector.matches(&labels(&[])));
        assert!(!selector.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn test_structured_selector() {
        let selector = from_value(&json!({
            "matchLabels": {"app": "api"},
            "matchExpressions": [{"key": "tier", "operator": "Exists"}]
        }))
        .unwrap();
        assert!(selector.matches(&labels(&[("app", "api"), ("tier", "x")])));
        assert!(!selector.matches(&labels(&[("app", "api")])));
        assert_eq!(selector.to_string(), "app=api,tier");
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = from_value(&json!({})).unwrap();
        assert!(selector.selects_all());
        assert!(selector.matches(&labels(&[("any", "thing")])));
    }

    #[test]
    fn test_invalid_terms() {
        assert!(parse("env in prod").is_err());
        assert!(parse("=value").is_err());
        assert!(
            from_value(&json!({
                "matchExpressions": [{"key": "a", "operator": "Near"}]
            }))
            .is_err()
        );
    }
}

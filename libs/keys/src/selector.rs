use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A `LabelSelector` with every collection sorted into a deterministic order, so
/// that two selectors that differ only in map/slice iteration order hash identically
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalSelector {
    pub match_labels: Vec<(String, String)>,
    pub match_expressions: Vec<CanonicalExpression>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalExpression {
    pub key: String,
    pub operator: String,
    pub values: Vec<String>,
}

pub fn canonicalize_selector(selector: &LabelSelector) -> CanonicalSelector {
    let match_labels: BTreeMap<String, String> = selector
        .match_labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut match_expressions: Vec<CanonicalExpression> = selector
        .match_expressions
        .clone()
        .unwrap_or_default()
        .into_iter()
        .map(|expr| {
            let mut values = expr.values.unwrap_or_default();
            values.sort_unstable();
            CanonicalExpression {
                key: expr.key,
                operator: expr.operator,
                values,
            }
        })
        .collect();
    match_expressions.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.values.cmp(&b.values)));

    CanonicalSelector {
        match_labels: match_labels.into_iter().collect(),
        match_expressions,
    }
}

/// Hash a `LabelSelector` into the processed-policy bucket key
/// Equal selectors (up to ordering) always hash to the same value.
pub fn hash_selector(selector: &LabelSelector) -> String {
    let canonical = canonicalize_selector(selector);
    let mut hasher = Sha256::new();
    for (k, v) in &canonical.match_labels {
        hasher.update(b"L\0");
        hasher.update(k.as_bytes());
        hasher.update(b"\0");
        hasher.update(v.as_bytes());
        hasher.update(b"\0");
    }
    for expr in &canonical.match_expressions {
        hasher.update(b"E\0");
        hasher.update(expr.key.as_bytes());
        hasher.update(b"\0");
        hasher.update(expr.operator.as_bytes());
        hasher.update(b"\0");
        for v in &expr.values {
            hasher.update(v.as_bytes());
            hasher.update(b"\0");
        }
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write;
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn selector(labels: &[(&str, &str)]) -> LabelSelector {
        LabelSelector {
            match_labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            match_expressions: None,
        }
    }

    #[test]
    fn hash_is_stable_under_map_reordering() {
        let s1 = selector(&[("app", "web"), ("tier", "front")]);
        let s2 = selector(&[("tier", "front"), ("app", "web")]);
        assert_eq!(hash_selector(&s1), hash_selector(&s2));
    }

    #[test]
    fn hash_is_stable_under_expression_value_reordering() {
        let s1 = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["prod".to_string(), "staging".to_string()]),
            }]),
        };
        let s2 = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["staging".to_string(), "prod".to_string()]),
            }]),
        };
        assert_eq!(hash_selector(&s1), hash_selector(&s2));
    }

    #[test]
    fn different_selectors_hash_differently() {
        let s1 = selector(&[("app", "web")]);
        let s2 = selector(&[("app", "api")]);
        assert_ne!(hash_selector(&s1), hash_selector(&s2));
    }
}

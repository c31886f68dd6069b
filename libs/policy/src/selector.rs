//! Label-selector atom parsing (§4.3): turns a `LabelSelector` into the set names a
//! rule's match clause ANDs together, split into positive atoms (membership proves
//! the match), negative atoms (membership disproves it — rendered as a DROP rule
//! ahead of the ACCEPT, mirroring how `ipBlock.except` precedes `ipBlock.cidr`), and
//! multi-value buckets (`In`/`NotIn` with more than one value, rendered as a
//! `list:set` whose members are the per-value sets, ORed by ipset's own list
//! semantics).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::error::{Error, Result};

/// Which set-naming convention a selector's atoms resolve through: a peer's
/// `podSelector` names pod label sets, a peer's `namespaceSelector` names namespace
/// label sets. The target selector of a policy is always a pod selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Pod,
    Namespace,
}

/// One `In`/`NotIn` expression with more than one value: rendered as a `list:set`
/// named by the unordered value tuple, whose members are the per-value sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiValueBucket {
    pub list_name: String,
    pub members: Vec<String>,
    /// `NotIn`: the translator emits a DROP rule against this bucket instead of
    /// folding it into the positive AND-clause.
    pub negate: bool,
}

/// The parsed result of one `LabelSelector`: atoms to AND together for a match, split
/// by polarity, plus any multi-value buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSelector {
    /// Set names whose membership must ALL hold (ANDed via repeated `-m set` clauses).
    pub positive: Vec<String>,
    /// Set names whose membership must NOT hold; each becomes its own DROP rule.
    pub negative: Vec<String>,
    pub multi: Vec<MultiValueBucket>,
}

impl ParsedSelector {
    /// True for a selector with no constraints at all (`{}` — every pod/namespace).
    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty() && self.multi.is_empty()
    }
}

pub fn parse_selector(selector: &LabelSelector, scope: Scope) -> Result<ParsedSelector> {
    let mut out = ParsedSelector::default();

    if let Some(match_labels) = &selector.match_labels {
        let mut kvs: Vec<(&String, &String)> = match_labels.iter().collect();
        kvs.sort_by(|a, b| a.0.cmp(b.0));
        for (k, v) in kvs {
            out.positive.push(kv_set_name(scope, k, v));
        }
    }

    if let Some(exprs) = &selector.match_expressions {
        let mut sorted: Vec<&LabelSelectorRequirement> = exprs.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        for expr in sorted {
            parse_expression(expr, scope, &mut out)?;
        }
    }

    out.positive.sort();
    out.negative.sort();
    out.multi.sort_by(|a, b| a.list_name.cmp(&b.list_name));
    Ok(out)
}

fn parse_expression(expr: &LabelSelectorRequirement, scope: Scope, out: &mut ParsedSelector) -> Result<()> {
    let key = expr.key.as_str();
    match expr.operator.as_str() {
        "Exists" => out.positive.push(key_set_name(scope, key)),
        "DoesNotExist" => out.negative.push(key_set_name(scope, key)),
        "In" => {
            let values = non_empty_values(expr, "In")?;
            if values.len() == 1 {
                out.positive.push(kv_set_name(scope, key, &values[0]));
            } else {
                out.multi.push(multi_bucket(scope, key, values, false));
            }
        }
        "NotIn" => {
            let values = non_empty_values(expr, "NotIn")?;
            if values.len() == 1 {
                out.negative.push(kv_set_name(scope, key, &values[0]));
            } else {
                out.multi.push(multi_bucket(scope, key, values, true));
            }
        }
        other => return Err(Error::UnknownOperator(other.to_string())),
    }
    Ok(())
}

fn non_empty_values<'a>(expr: &'a LabelSelectorRequirement, op: &str) -> Result<&'a [String]> {
    match &expr.values {
        Some(values) if !values.is_empty() => Ok(values),
        _ => Err(Error::MissingValues(expr.key.clone(), op.to_string())),
    }
}

fn multi_bucket(scope: Scope, key: &str, values: &[String], negate: bool) -> MultiValueBucket {
    let list_name = kubenp_keys::multi_value_set_name(key, values, negate);
    let members = values.iter().map(|v| kv_set_name(scope, key, v)).collect();
    MultiValueBucket {
        list_name,
        members,
        negate,
    }
}

fn key_set_name(scope: Scope, key: &str) -> String {
    match scope {
        Scope::Pod => kubenp_keys::label_set_name(key),
        Scope::Namespace => kubenp_keys::ns_label_set_name(key),
    }
}

fn kv_set_name(scope: Scope, key: &str, value: &str) -> String {
    match scope {
        Scope::Pod => kubenp_keys::label_kv_set_name(key, value),
        Scope::Namespace => kubenp_keys::ns_label_kv_set_name(key, value),
    }
}

/// Namespace peer selectors are flattened rather than bucketed (§4.3): a
/// multi-value `In`/`NotIn` expression on a `namespaceSelector` expands into one
/// combination per value, each combination emitted as its own rule, instead of an
/// ipset `list:set`. Pod selectors never flatten this way — only the namespace half
/// of a peer does.
pub fn flatten_namespace_selector(selector: &LabelSelector) -> Result<Vec<ParsedSelector>> {
    let mut base = ParsedSelector::default();
    let mut value_groups: Vec<Vec<String>> = Vec::new();
    let mut negate_groups: Vec<bool> = Vec::new();
    let mut keys: Vec<String> = Vec::new();

    if let Some(match_labels) = &selector.match_labels {
        let mut kvs: Vec<(&String, &String)> = match_labels.iter().collect();
        kvs.sort_by(|a, b| a.0.cmp(b.0));
        for (k, v) in kvs {
            base.positive.push(kubenp_keys::ns_label_kv_set_name(k, v));
        }
    }

    if let Some(exprs) = &selector.match_expressions {
        let mut sorted: Vec<&LabelSelectorRequirement> = exprs.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        for expr in sorted {
            let key = expr.key.as_str();
            match expr.operator.as_str() {
                "Exists" => base.positive.push(kubenp_keys::ns_label_set_name(key)),
                "DoesNotExist" => base.negative.push(kubenp_keys::ns_label_set_name(key)),
                "In" => {
                    let values = non_empty_values(expr, "In")?;
                    keys.push(key.to_string());
                    value_groups.push(values.to_vec());
                    negate_groups.push(false);
                }
                "NotIn" => {
                    let values = non_empty_values(expr, "NotIn")?;
                    keys.push(key.to_string());
                    value_groups.push(values.to_vec());
                    negate_groups.push(true);
                }
                other => return Err(Error::UnknownOperator(other.to_string())),
            }
        }
    }

    if value_groups.is_empty() {
        base.positive.sort();
        base.negative.sort();
        return Ok(vec![base]);
    }

    let mut combos = vec![base];
    for (idx, values) in value_groups.iter().enumerate() {
        let key = &keys[idx];
        let negate = negate_groups[idx];
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                let set_name = kubenp_keys::ns_label_kv_set_name(key, value);
                if negate {
                    extended.negative.push(set_name);
                } else {
                    extended.positive.push(set_name);
                }
                next.push(extended);
            }
        }
        combos = next;
    }
    for combo in &mut combos {
        combo.positive.sort();
        combo.negative.sort();
    }
    Ok(combos)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn match_labels_become_positive_kv_atoms() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("app", "web")])),
            ..Default::default()
        };
        let parsed = parse_selector(&selector, Scope::Pod).unwrap();
        assert_eq!(parsed.positive, vec!["app:web".to_string()]);
        assert!(parsed.negative.is_empty());
    }

    #[test]
    fn single_value_not_in_is_a_negative_atom() {
        let selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "NotIn".to_string(),
                values: Some(vec!["back".to_string()]),
            }]),
            ..Default::default()
        };
        let parsed = parse_selector(&selector, Scope::Pod).unwrap();
        assert_eq!(parsed.negative, vec!["tier:back".to_string()]);
    }

    #[test]
    fn multi_value_in_becomes_a_bucket() {
        let selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "env".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["dev".to_string(), "stage".to_string()]),
            }]),
            ..Default::default()
        };
        let parsed = parse_selector(&selector, Scope::Pod).unwrap();
        assert_eq!(parsed.multi.len(), 1);
        assert!(!parsed.multi[0].negate);
        assert_eq!(parsed.multi[0].members.len(), 2);
    }

    #[test]
    fn does_not_exist_is_negative() {
        let selector = LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "sidecar".to_string(),
                operator: "DoesNotExist".to_string(),
                values: None,
            }]),
            ..Default::default()
        };
        let parsed = parse_selector(&selector, Scope::Pod).unwrap();
        assert_eq!(parsed.negative, vec!["sidecar".to_string()]);
    }

    #[test]
    fn empty_selector_matches_everything() {
        let parsed = parse_selector(&LabelSelector::default(), Scope::Pod).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn namespace_multi_value_flattens_into_one_combo_per_value() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("team", "sre")])),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "stage".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["dev".to_string(), "prod".to_string()]),
            }]),
        };
        let combos = flatten_namespace_selector(&selector).unwrap();
        assert_eq!(combos.len(), 2);
        for combo in &combos {
            assert!(combo.positive.contains(&"ns-team:sre".to_string()));
        }
        assert!(combos[0].positive.contains(&"ns-stage:dev".to_string()));
        assert!(combos[1].positive.contains(&"ns-stage:prod".to_string()));
    }

    #[test]
    fn namespace_without_multi_value_expressions_is_a_single_combo() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("team", "sre")])),
            ..Default::default()
        };
        let combos = flatten_namespace_selector(&selector).unwrap();
        assert_eq!(combos.len(), 1);
    }

    #[test]
    fn two_multi_value_expressions_produce_the_cartesian_product() {
        let selector = LabelSelector {
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "stage".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["dev".to_string(), "prod".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "region".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["us".to_string(), "eu".to_string()]),
                },
            ]),
            ..Default::default()
        };
        let combos = flatten_namespace_selector(&selector).unwrap();
        assert_eq!(combos.len(), 4);
    }
}

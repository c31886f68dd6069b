//! Symmetric-difference helpers shared by the pod and namespace controllers'
//! `LabelChanged` transitions (§4.4.1, §4.4.2): both only need to know which label
//! keys/values were added or removed between two observations of the same object,
//! never the full new label set.

use std::collections::BTreeMap;

/// Split two label maps into `(added, removed)` pairs. A key whose value changed
/// shows up once in each list (the old `(k, old_v)` is "removed", the new
/// `(k, new_v)` is "added"), since the two values back different ipset elements.
pub fn label_diff(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let mut added = Vec::new();
    let mut removed = Vec::new();

    for (k, v) in new {
        if old.get(k) != Some(v) {
            added.push((k.clone(), v.clone()));
        }
    }
    for (k, v) in old {
        if new.get(k) != Some(v) {
            removed.push((k.clone(), v.clone()));
        }
    }
    (added, removed)
}

#[cfg(test)]
mod test {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn unchanged_labels_produce_no_diff() {
        let labels = map(&[("app", "web")]);
        let (added, removed) = label_diff(&labels, &labels);
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn added_and_removed_keys_are_split() {
        let old = map(&[("app", "web"), ("tier", "front")]);
        let new = map(&[("app", "web"), ("team", "sre")]);
        let (added, removed) = label_diff(&old, &new);
        assert_eq!(added, vec![("team".to_string(), "sre".to_string())]);
        assert_eq!(removed, vec![("tier".to_string(), "front".to_string())]);
    }

    #[test]
    fn changed_value_shows_up_on_both_sides() {
        let old = map(&[("app", "web")]);
        let new = map(&[("app", "api")]);
        let (added, removed) = label_diff(&old, &new);
        assert_eq!(added, vec![("app".to_string(), "api".to_string())]);
        assert_eq!(removed, vec![("app".to_string(), "web".to_string())]);
    }
}

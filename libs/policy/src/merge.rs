//! Bucket-level bookkeeping for policies that share a `(namespace, pod_selector_hash)`
//! key. Correctness of the installed dataplane never depends on this: IPSE/RLE already
//! refcount every element/rule by owner key, so two policies targeting the same pods
//! install independently-owned, independently-removable entries. `ProcessedPolicy`
//! exists so the cache can answer "is this bucket still isolated for ingress/egress"
//! without re-scanning every raw policy.

use std::collections::BTreeMap;

use crate::types::CompiledPolicy;

/// The union view of every policy sharing one `(namespace, pod_selector_hash)` bucket.
/// Upstream NetworkPolicy semantics: a pod becomes isolated for a direction the moment
/// ANY policy selecting it declares that `policyTypes` entry, so the bucket's
/// `ingress`/`egress` flags are a logical OR over its member policies, not a property
/// of any single one.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProcessedPolicy {
    pub namespace: String,
    pub pod_selector_hash: String,
    pub ingress: bool,
    pub egress: bool,
    members: BTreeMap<String, CompiledPolicy>,
}

impl ProcessedPolicy {
    pub fn new(namespace: impl Into<String>, pod_selector_hash: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod_selector_hash: pod_selector_hash.into(),
            ingress: false,
            egress: false,
            members: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, name: &str) -> Option<&CompiledPolicy> {
        self.members.get(name)
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    /// Adds or replaces a member policy (upsert on name) and recomputes the union flags.
    pub fn add_policy(&mut self, compiled: CompiledPolicy) {
        self.members.insert(compiled.name.clone(), compiled);
        self.recompute();
    }

    /// Removes a member by name; recomputes the union flags. Returns the removed
    /// policy so its caller can deduct its individual rule entries/sets from the
    /// dataplane.
    pub fn remove_policy(&mut self, name: &str) -> Option<CompiledPolicy> {
        let removed = self.members.remove(name);
        self.recompute();
        removed
    }

    fn recompute(&mut self) {
        self.ingress = self.members.values().any(|p| p.ingress);
        self.egress = self.members.values().any(|p| p.egress);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn compiled(name: &str, ingress: bool, egress: bool) -> CompiledPolicy {
        CompiledPolicy {
            namespace: "dev".to_string(),
            name: name.to_string(),
            ingress,
            egress,
            ..Default::default()
        }
    }

    #[test]
    fn union_flags_stay_true_while_any_member_declares_them() {
        let mut bucket = ProcessedPolicy::new("dev", "abc");
        bucket.add_policy(compiled("a", true, false));
        bucket.add_policy(compiled("b", false, true));
        assert!(bucket.ingress);
        assert!(bucket.egress);

        bucket.remove_policy("b");
        assert!(bucket.ingress);
        assert!(!bucket.egress);
    }

    #[test]
    fn removing_the_last_member_empties_the_bucket() {
        let mut bucket = ProcessedPolicy::new("dev", "abc");
        bucket.add_policy(compiled("a", true, true));
        bucket.remove_policy("a");
        assert!(bucket.is_empty());
        assert!(!bucket.ingress);
        assert!(!bucket.egress);
    }

    #[test]
    fn replacing_a_member_by_name_recomputes_flags() {
        let mut bucket = ProcessedPolicy::new("dev", "abc");
        bucket.add_policy(compiled("a", true, false));
        bucket.add_policy(compiled("a", false, false));
        assert!(!bucket.ingress);
        assert_eq!(bucket.member_names().count(), 1);
    }
}

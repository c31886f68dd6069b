use kubenp_policy::CompiledPolicy;

/// Key a raw policy is stored under: `<namespace>/<name>` (§3).
pub fn raw_policy_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// The last-applied `NetworkPolicy` together with its compiled form (§3): presence
/// in the raw map implies its `rule_entries` are currently installed. Keeping the
/// compiled output alongside the resource version lets the NetworkPolicy controller
/// detect a no-op re-apply without re-running the translator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RawPolicyEntry {
    pub namespace: String,
    pub name: String,
    pub resource_version: Option<u64>,
    pub compiled: CompiledPolicy,
}

impl RawPolicyEntry {
    pub fn new(resource_version: Option<u64>, compiled: CompiledPolicy) -> Self {
        Self {
            namespace: compiled.namespace.clone(),
            name: compiled.name.clone(),
            resource_version,
            compiled,
        }
    }

    pub fn key(&self) -> String {
        raw_policy_key(&self.namespace, &self.name)
    }

    /// `(namespace, pod_selector_hash)` bucket key this policy belongs to in the
    /// processed-policy map (§3, §4.3).
    pub fn bucket_key(&self) -> String {
        format!("{}/{}", self.namespace, self.compiled.pod_selector_hash)
    }
}

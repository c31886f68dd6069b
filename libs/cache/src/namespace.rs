use std::collections::BTreeMap;

/// Reserved cache key for the synthetic "all-namespaces" entity (§3): always present
/// from bootstrap, independent of whether any real namespace has been observed yet.
/// It never surfaces in `ns-<name>` form and is skipped by iteration helpers that
/// only want real namespaces.
pub const ALL_NAMESPACES_KEY: &str = "__all_namespaces__";

/// One namespace's cached state (§3). `labels` drives the per-label namespace lists
/// (`ns-<k>`/`ns-<k>:<v>`) the namespace controller maintains.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NamespaceEntry {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub resource_version: Option<u64>,
}

impl NamespaceEntry {
    pub fn new(name: impl Into<String>, labels: BTreeMap<String, String>, resource_version: Option<u64>) -> Self {
        Self {
            name: name.into(),
            labels,
            resource_version,
        }
    }
}

//! The `/debug` HTTP surface payload (§6): a point-in-time view of the cache plus
//! whatever the caller chooses to pass in for the dataplane-side `ListMap`/`SetMap`
//! (those live in IPSE, not here, so `kubenp-operator` assembles the full object).

use std::collections::BTreeMap;

use crate::CacheInner;

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DebugSnapshot {
    #[serde(rename = "NodeName")]
    pub node_name: String,
    #[serde(rename = "NsMap")]
    pub ns_map: BTreeMap<String, CacheInner>,
    #[serde(rename = "PodMap")]
    pub pod_map: BTreeMap<String, String>,
    #[serde(rename = "ListMap")]
    pub list_map: BTreeMap<String, Vec<String>>,
    #[serde(rename = "SetMap")]
    pub set_map: BTreeMap<String, Vec<String>>,
}

/// Build the `/debug` payload from a cache snapshot plus the dataplane-side
/// introspection the caller collected from IPSE. `ns_map` intentionally nests the
/// whole cache under the node name rather than flattening namespace entries, since
/// the debug endpoint exists for integration tests and human inspection, not for
/// machine consumption by another controller.
pub fn build(
    node_name: &str,
    cache: CacheInner,
    list_map: BTreeMap<String, Vec<String>>,
    set_map: BTreeMap<String, Vec<String>>,
) -> DebugSnapshot {
    let pod_map = cache
        .pods
        .iter()
        .map(|(key, pod)| (key.clone(), pod.ip.clone()))
        .collect();
    let mut ns_map = BTreeMap::new();
    ns_map.insert(node_name.to_string(), cache);
    DebugSnapshot {
        node_name: node_name.to_string(),
        ns_map,
        pod_map,
        list_map,
        set_map,
    }
}

//! Assembles the `/debug` HTTP payload (§6) from the cache snapshot and IPSE's
//! dataplane-side set/list introspection.

use std::collections::BTreeMap;

use kubenp_cache::{DebugSnapshot, build_debug_snapshot};

use crate::context::Engines;

pub async fn snapshot(node_name: &str, engines: &Engines) -> DebugSnapshot {
    let cache = engines.cache.snapshot().await;
    let list_map: BTreeMap<String, Vec<String>> = engines.ipset.lists_snapshot().await.into_iter().collect();
    let set_map: BTreeMap<String, Vec<String>> = engines.ipset.sets_snapshot().await.into_iter().collect();
    build_debug_snapshot(node_name, cache, list_map, set_map)
}

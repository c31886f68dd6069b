//! Namespace controller (NSC, §4.4.2): maintains the per-namespace set and its
//! membership in the all-namespaces list and every label-keyed namespace list.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use kube::runtime::reflector::ObjectRef;
use kubenp_cache::{NamespaceEntry, label_diff};
use kubenp_ipset::{IpsetEngine, SetKind};
use kubenp_keys::{all_namespaces_list, namespace_set_name, ns_label_kv_set_name, ns_label_set_name};
use tracing::{debug, instrument};

use crate::context::{Context, NamespacedName};
use crate::error::{Error, Result};

fn to_entry(ns: &Namespace) -> Result<NamespaceEntry> {
    let name = ns.name_any();
    if name.is_empty() {
        return Err(Error::InvalidObject("namespace has no name".into()));
    }
    let labels: BTreeMap<String, String> = ns.labels().clone().into_iter().collect();
    let resource_version = ns.resource_version().and_then(|rv| kubenp_keys::parse_resource_version(&rv));
    Ok(NamespaceEntry::new(name, labels, resource_version))
}

/// Adds `ns_set`'s membership in every label-keyed namespace list. Shared with
/// [`crate::bootstrap::replay_owner_maps`], which replays every cached namespace's
/// memberships back through IPSE after a restart.
pub(crate) async fn add_label_memberships(ipset: &IpsetEngine, ns_set: &str, labels: &BTreeMap<String, String>) -> Result<()> {
    for (k, v) in labels {
        let key_set = ns_label_set_name(k);
        ipset.create_list(&key_set).await?;
        ipset.add_to_list(&key_set, ns_set).await?;
        let kv_set = ns_label_kv_set_name(k, v);
        ipset.create_list(&kv_set).await?;
        ipset.add_to_list(&kv_set, ns_set).await?;
    }
    Ok(())
}

async fn remove_label_memberships(ipset: &IpsetEngine, ns_set: &str, labels: &BTreeMap<String, String>) -> Result<()> {
    for (k, v) in labels {
        ipset.delete_from_list(&ns_label_set_name(k), ns_set).await?;
        ipset.delete_from_list(&ns_label_kv_set_name(k, v), ns_set).await?;
    }
    Ok(())
}

#[instrument(skip(ctx), fields(name = %key.name))]
pub async fn reconcile_namespace(ctx: &Context, key: &NamespacedName) -> Result<()> {
    let observed = ctx.namespace_store.get(&ObjectRef::new(&key.name));
    let observed_entry = observed.as_deref().map(to_entry).transpose()?;

    let ns_set = namespace_set_name(&key.name);
    let mut cache = ctx.engines.cache.lock().await;
    let cached_entry = cache.namespaces.get(&key.name).cloned();

    match (cached_entry, observed_entry) {
        (None, None) => {}
        (None, Some(entry)) => {
            debug!(msg = "namespace added");
            ctx.engines.ipset.create_set(&ns_set, SetKind::NetHash).await?;
            ctx.engines.ipset.create_list(all_namespaces_list()).await?;
            ctx.engines.ipset.add_to_list(all_namespaces_list(), &ns_set).await?;
            add_label_memberships(&ctx.engines.ipset, &ns_set, &entry.labels).await?;
            cache.namespaces.insert(key.name.clone(), entry);
        }
        (Some(old_entry), None) => {
            debug!(msg = "namespace deleted");
            remove_label_memberships(&ctx.engines.ipset, &ns_set, &old_entry.labels).await?;
            ctx.engines.ipset.delete_from_list(all_namespaces_list(), &ns_set).await?;
            ctx.engines.ipset.destroy_set(&ns_set).await?;
            cache.namespaces.remove(&key.name);
        }
        (Some(old_entry), Some(new_entry)) => {
            if old_entry.labels != new_entry.labels {
                debug!(msg = "namespace labels changed");
                let (added, removed) = label_diff(&old_entry.labels, &new_entry.labels);
                let removed_map: BTreeMap<String, String> = removed.into_iter().collect();
                let added_map: BTreeMap<String, String> = added.into_iter().collect();
                remove_label_memberships(&ctx.engines.ipset, &ns_set, &removed_map).await?;
                add_label_memberships(&ctx.engines.ipset, &ns_set, &added_map).await?;
            }
            cache.namespaces.insert(key.name.clone(), new_entry);
        }
    }
    Ok(())
}

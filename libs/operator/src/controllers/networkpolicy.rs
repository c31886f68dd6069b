//! NetworkPolicy controller (NPC, §4.4.3): compiles a `NetworkPolicy` via
//! `kubenp_policy::compile`, installs the resulting sets/lists/rules, and maintains
//! the processed-policy bucket and the top-level chain tree's lifetime.

use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::ResourceExt;
use kube::runtime::reflector::ObjectRef;
use kubenp_cache::{CacheInner, RawPolicyEntry, raw_policy_key};
use kubenp_ipset::IpsetEngine;
use kubenp_policy::{CompiledPolicy, ProcessedPolicy, compile};
use kubenp_ruleengine::RuleEngine;
use tracing::{debug, instrument};

use crate::context::{Context, NamespacedName};
use crate::error::{Error, Result};

/// Installs one compiled policy's sets/lists/rules. Shared with
/// [`crate::bootstrap::replay_owner_maps`], which replays every cached policy back
/// through IPSE/RLE after a restart.
pub(crate) async fn install_policy(ipset: &IpsetEngine, ruleengine: &RuleEngine, compiled: &CompiledPolicy) -> Result<()> {
    let owner = compiled.owner_key();

    for set in compiled.pod_sets.iter().chain(compiled.named_port_sets.iter()) {
        ipset.create_set(&set.name, set.kind).await?;
    }
    for list in &compiled.lists {
        ipset.create_list(&list.name).await?;
        for member in &list.members {
            ipset.add_to_list(&list.name, member).await?;
        }
    }
    for cidr_set in compiled.ingress_cidrs.iter().chain(compiled.egress_cidrs.iter()) {
        ipset.create_set(&cidr_set.name, kubenp_ipset::SetKind::NetHash).await?;
        for cidr in &cidr_set.cidrs {
            ipset.add_to_set(&cidr_set.name, &owner, cidr).await?;
        }
    }
    for entry in &compiled.rule_entries {
        ruleengine.add(&owner, entry).await?;
    }
    Ok(())
}

/// Tear down everything [`install_policy`] put in place, in reverse order (§4.4.3
/// "delete rule entries in reverse order").
async fn uninstall_policy(ipset: &IpsetEngine, ruleengine: &RuleEngine, compiled: &CompiledPolicy) -> Result<()> {
    let owner = compiled.owner_key();

    for entry in compiled.rule_entries.iter().rev() {
        ruleengine.delete(&owner, entry).await?;
    }
    for cidr_set in compiled.ingress_cidrs.iter().chain(compiled.egress_cidrs.iter()) {
        for cidr in &cidr_set.cidrs {
            ipset.delete_from_set(&cidr_set.name, &owner, cidr).await?;
        }
    }
    for list in &compiled.lists {
        for member in &list.members {
            ipset.delete_from_list(&list.name, member).await?;
        }
    }
    Ok(())
}

fn bucket_key(namespace: &str, pod_selector_hash: &str) -> String {
    format!("{namespace}/{pod_selector_hash}")
}

#[instrument(skip(ctx), fields(namespace = %key.namespace, name = %key.name))]
pub async fn reconcile_networkpolicy(ctx: &Context, key: &NamespacedName) -> Result<()> {
    let observed = ctx
        .networkpolicy_store
        .get(&ObjectRef::new(&key.name).within(&key.namespace));
    let raw_key = raw_policy_key(&key.namespace, &key.name);

    let ipset = &*ctx.engines.ipset;
    let ruleengine = &*ctx.engines.ruleengine;
    let mut cache = ctx.engines.cache.lock().await;

    match observed {
        None => {
            let Some(existing) = cache.raw_policies.remove(&raw_key) else {
                return Ok(());
            };
            debug!(msg = "network policy deleted");
            uninstall_policy(ipset, ruleengine, &existing.compiled).await?;
            deduct_from_bucket(&mut cache, &existing);
            maybe_uninit_chain_tree(&mut cache, ruleengine).await?;
        }
        Some(np) => {
            let compiled = compile_policy(&np)?;
            match cache.raw_policies.get(&raw_key).cloned() {
                None => {
                    debug!(msg = "network policy added");
                    ensure_chain_tree(&mut cache, ruleengine).await?;
                    install_policy(ipset, ruleengine, &compiled).await?;
                    add_to_bucket(&mut cache, compiled.clone());
                    cache
                        .raw_policies
                        .insert(raw_key, RawPolicyEntry::new(resource_version(&np), compiled));
                }
                Some(existing) if existing.compiled != compiled => {
                    debug!(msg = "network policy updated");
                    // safe-to-clean guards this window: the chain tree must survive
                    // the delete phase since the add phase immediately follows.
                    cache.safe_to_clean = false;
                    uninstall_policy(ipset, ruleengine, &existing.compiled).await?;
                    deduct_from_bucket(&mut cache, &existing);
                    install_policy(ipset, ruleengine, &compiled).await?;
                    add_to_bucket(&mut cache, compiled.clone());
                    cache
                        .raw_policies
                        .insert(raw_key, RawPolicyEntry::new(resource_version(&np), compiled));
                    cache.safe_to_clean = true;
                }
                Some(_) => {
                    // same spec: a resourceVersion-only bump, nothing to reconcile.
                }
            }
        }
    }
    Ok(())
}

fn compile_policy(np: &NetworkPolicy) -> Result<CompiledPolicy> {
    compile(np).map_err(|err| Error::InvalidObject(err.to_string()))
}

fn resource_version(np: &NetworkPolicy) -> Option<u64> {
    np.resource_version().and_then(|rv| kubenp_keys::parse_resource_version(&rv))
}

fn add_to_bucket(cache: &mut CacheInner, compiled: CompiledPolicy) {
    let key = bucket_key(&compiled.namespace, &compiled.pod_selector_hash);
    let bucket = cache
        .processed
        .entry(key)
        .or_insert_with(|| ProcessedPolicy::new(compiled.namespace.clone(), compiled.pod_selector_hash.clone()));
    bucket.add_policy(compiled);
}

fn deduct_from_bucket(cache: &mut CacheInner, existing: &RawPolicyEntry) {
    let key = existing.bucket_key();
    if let Some(bucket) = cache.processed.get_mut(&key) {
        bucket.remove_policy(&existing.name);
        if bucket.is_empty() {
            cache.processed.remove(&key);
        }
    }
}

async fn ensure_chain_tree(cache: &mut CacheInner, ruleengine: &RuleEngine) -> Result<()> {
    if !cache.chain_initialized {
        ruleengine.init_chains().await?;
        cache.chain_initialized = true;
    }
    Ok(())
}

/// Uninit the chain tree once no raw policy remains, unless mid-update
/// (§4.4.3/§7 `safe-to-clean`).
async fn maybe_uninit_chain_tree(cache: &mut CacheInner, ruleengine: &RuleEngine) -> Result<()> {
    if cache.safe_to_clean && !cache.has_any_policy() && cache.chain_initialized {
        ruleengine.uninit_chains().await?;
        cache.chain_initialized = false;
    }
    Ok(())
}

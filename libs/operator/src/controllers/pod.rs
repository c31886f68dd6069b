//! Pod controller (PODC, §4.4.1): maintains the namespace and per-label membership
//! sets, and the named-port sets, for every non-host-networked pod with an IP.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube::runtime::reflector::ObjectRef;
use kubenp_cache::{NamedPort, PodEntry, PodPhase, PortProtocol, pod_key};
use kubenp_ipset::{IpsetEngine, SetKind};
use kubenp_keys::{NamedPortProtocol, label_kv_set_name, label_set_name, named_port_element, named_port_set_name, namespace_set_name};
use tracing::{debug, instrument};

use crate::context::{Context, PodKey};
use crate::error::{Error, Result};

/// Whether `pod` is eligible for materialisation in the cache (§3 "Pod state"
/// invariant): non-host-networked, has an IP, not terminal.
fn is_materializable(pod: &Pod) -> bool {
    let host_network = pod
        .spec
        .as_ref()
        .and_then(|s| s.host_network)
        .unwrap_or(false);
    if host_network {
        return false;
    }
    let has_ip = pod
        .status
        .as_ref()
        .and_then(|s| s.pod_ip.as_deref())
        .map(|ip| !ip.is_empty())
        .unwrap_or(false);
    if !has_ip {
        return false;
    }
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::from)
        .unwrap_or(PodPhase::Unknown);
    !phase.is_terminal()
}

fn to_entry(pod: &Pod) -> Result<PodEntry> {
    let namespace = pod
        .namespace()
        .ok_or_else(|| Error::InvalidObject("pod has no namespace".into()))?;
    let name = pod.name_any();
    let uid = pod
        .uid()
        .ok_or_else(|| Error::InvalidObject(format!("pod {namespace}/{name} has no uid")))?;
    let ip = pod
        .status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .ok_or_else(|| Error::InvalidObject(format!("pod {namespace}/{name} has no pod IP")))?;
    let labels: BTreeMap<String, String> = pod.labels().clone().into_iter().collect();
    let resource_version = pod.resource_version().and_then(|rv| kubenp_keys::parse_resource_version(&rv));
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(PodPhase::from)
        .unwrap_or(PodPhase::Unknown);

    let mut named_ports = Vec::new();
    if let Some(spec) = &pod.spec {
        for container in &spec.containers {
            for port in container.ports.iter().flatten() {
                if let Some(port_name) = &port.name {
                    let protocol = port
                        .protocol
                        .as_deref()
                        .map(PortProtocol::from)
                        .unwrap_or(PortProtocol::Tcp);
                    named_ports.push(NamedPort {
                        name: port_name.clone(),
                        protocol,
                        port: port.container_port as u16,
                    });
                }
            }
        }
    }

    Ok(PodEntry::new(namespace, name, uid, ip, labels, named_ports, resource_version, phase))
}

fn to_keys_protocol(protocol: PortProtocol) -> NamedPortProtocol {
    match protocol {
        PortProtocol::Tcp => NamedPortProtocol::Tcp,
        PortProtocol::Udp => NamedPortProtocol::Udp,
        PortProtocol::Sctp => NamedPortProtocol::Sctp,
    }
}

/// `(set name, kind, element)` triples a pod owns membership in, for the given IP
/// and labels (§8 property 1).
fn label_and_ns_memberships(namespace: &str, ip: &str, labels: &BTreeMap<String, String>) -> Vec<(String, SetKind, String)> {
    let mut out = vec![(namespace_set_name(namespace), SetKind::NetHash, ip.to_string())];
    for (k, v) in labels {
        out.push((label_set_name(k), SetKind::NetHash, ip.to_string()));
        out.push((label_kv_set_name(k, v), SetKind::NetHash, ip.to_string()));
    }
    out
}

fn named_port_memberships(ip: &str, named_ports: &[NamedPort]) -> Vec<(String, SetKind, String)> {
    named_ports
        .iter()
        .map(|p| {
            (
                named_port_set_name(&p.name),
                SetKind::IpPortHash,
                named_port_element(ip, to_keys_protocol(p.protocol), p.port),
            )
        })
        .collect()
}

/// `(set name, kind, element)` triples a pod owns membership in (§8 property 1).
/// Shared with [`crate::bootstrap::replay_owner_maps`], which replays every cached
/// pod's memberships back through IPSE after a restart.
pub(crate) fn all_memberships(entry: &PodEntry) -> Vec<(String, SetKind, String)> {
    let mut out = label_and_ns_memberships(&entry.namespace, &entry.ip, &entry.labels);
    out.extend(named_port_memberships(&entry.ip, &entry.named_ports));
    out
}

pub(crate) async fn add_memberships(ipset: &IpsetEngine, owner: &str, memberships: &[(String, SetKind, String)]) -> Result<()> {
    for (set, kind, element) in memberships {
        ipset.create_set(set, *kind).await?;
        ipset.add_to_set(set, owner, element).await?;
    }
    Ok(())
}

async fn delete_memberships(ipset: &IpsetEngine, owner: &str, memberships: &[(String, SetKind, String)]) -> Result<()> {
    for (set, _kind, element) in memberships {
        ipset.delete_from_set(set, owner, element).await?;
    }
    Ok(())
}

#[instrument(skip(ctx), fields(namespace = %key.namespace, name = %key.name))]
pub async fn reconcile_pod(ctx: &Context, key: &PodKey) -> Result<()> {
    let owner = pod_key(&key.namespace, &key.name, &key.uid);
    let observed = ctx
        .pod_store
        .get(&ObjectRef::new(&key.name).within(&key.namespace));

    let observed_entry = match &observed {
        Some(pod) if is_materializable(pod) => Some(to_entry(pod)?),
        _ => None,
    };

    let mut cache = ctx.engines.cache.lock().await;
    let cached_entry = cache.pods.get(&owner).cloned();

    match (cached_entry, observed_entry) {
        (None, None) => {}
        (None, Some(new_entry)) => {
            debug!(msg = "pod added");
            add_memberships(&ctx.engines.ipset, &owner, &all_memberships(&new_entry)).await?;
            cache.pods.insert(owner, new_entry);
        }
        (Some(old_entry), None) => {
            debug!(msg = "pod removed (deleted, terminal, or now host-networked)");
            delete_memberships(&ctx.engines.ipset, &owner, &all_memberships(&old_entry)).await?;
            cache.pods.remove(&owner);
        }
        (Some(old_entry), Some(new_entry)) => {
            if old_entry.uid != new_entry.uid {
                return Err(Error::InvariantViolation(format!(
                    "pod {}/{} uid changed from {} to {} without a delete event",
                    key.namespace, key.name, old_entry.uid, new_entry.uid
                )));
            }
            if old_entry.ip != new_entry.ip {
                debug!(msg = "pod IP changed", old_ip = %old_entry.ip, new_ip = %new_entry.ip);
                delete_memberships(&ctx.engines.ipset, &owner, &all_memberships(&old_entry)).await?;
                add_memberships(&ctx.engines.ipset, &owner, &all_memberships(&new_entry)).await?;
            } else {
                if old_entry.labels != new_entry.labels {
                    let (added, removed) = kubenp_cache::label_diff(&old_entry.labels, &new_entry.labels);
                    for (k, v) in &removed {
                        ctx.engines.ipset.delete_from_set(&label_set_name(k), &owner, &old_entry.ip).await?;
                        ctx.engines.ipset.delete_from_set(&label_kv_set_name(k, v), &owner, &old_entry.ip).await?;
                    }
                    for (k, v) in &added {
                        let set = label_set_name(k);
                        ctx.engines.ipset.create_set(&set, SetKind::NetHash).await?;
                        ctx.engines.ipset.add_to_set(&set, &owner, &new_entry.ip).await?;
                        let kv_set = label_kv_set_name(k, v);
                        ctx.engines.ipset.create_set(&kv_set, SetKind::NetHash).await?;
                        ctx.engines.ipset.add_to_set(&kv_set, &owner, &new_entry.ip).await?;
                    }
                }
                if old_entry.named_ports != new_entry.named_ports {
                    delete_memberships(&ctx.engines.ipset, &owner, &named_port_memberships(&old_entry.ip, &old_entry.named_ports)).await?;
                    add_memberships(&ctx.engines.ipset, &owner, &named_port_memberships(&new_entry.ip, &new_entry.named_ports)).await?;
                }
            }
            cache.pods.insert(owner, new_entry);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_networked_pods_are_never_materializable() {
        let mut pod = Pod::default();
        pod.spec = Some(k8s_openapi::api::core::v1::PodSpec {
            host_network: Some(true),
            ..Default::default()
        });
        pod.status = Some(k8s_openapi::api::core::v1::PodStatus {
            pod_ip: Some("10.0.0.5".into()),
            phase: Some("Running".into()),
            ..Default::default()
        });
        assert!(!is_materializable(&pod));
    }

    #[test]
    fn terminal_pods_are_not_materializable() {
        let mut pod = Pod::default();
        pod.status = Some(k8s_openapi::api::core::v1::PodStatus {
            pod_ip: Some("10.0.0.5".into()),
            phase: Some("Succeeded".into()),
            ..Default::default()
        });
        assert!(!is_materializable(&pod));
    }

    #[test]
    fn label_and_ns_memberships_cover_both_label_forms() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "web".to_string());
        let memberships = label_and_ns_memberships("dev", "10.0.0.5", &labels);
        let sets: Vec<&str> = memberships.iter().map(|(s, _, _)| s.as_str()).collect();
        assert!(sets.contains(&"ns-dev"));
        assert!(sets.contains(&"app"));
        assert!(sets.contains(&"app:web"));
    }
}

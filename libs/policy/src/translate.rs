//! The Policy Translator (PT, §4.3): compiles one `NetworkPolicy` into the
//! deterministic `(pod_sets, named_port_sets, lists, ingress_cidrs, egress_cidrs,
//! rule_entries)` tuple that a caller applies against IPSE/RLE. Pure — this module
//! never touches either engine.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kubenp_keys::{Direction, all_namespaces_list, kube_system_set, namespace_set_name, named_port_set_name, policy_cidr_set_name};
use kubenp_ruleengine::{Chain, Match, Position, Protocol as RProtocol, RuleEntry, Target};
use tracing::warn;

use crate::error::{Error, Result};
use crate::selector::{ParsedSelector, Scope, flatten_namespace_selector, parse_selector};
use crate::types::{CidrSetDef, CompiledPolicy, ListDef, SetDef};

/// Positive/negative label-set atoms a policy's own pod selector resolves to,
/// already widened with the policy's namespace (a pod selector only ever matches
/// pods local to the policy's own namespace).
struct TargetAtoms {
    positive: Vec<String>,
    negative: Vec<String>,
}

/// Per-direction wiring: which chains a rule in this direction installs into, and
/// whether the peer occupies the packet's source or destination side.
struct DirCtx {
    direction: Direction,
    port_chain: Chain,
    ns_chain: Chain,
    pod_chain: Chain,
    peer_is_src: bool,
}

const INGRESS: DirCtx = DirCtx {
    direction: Direction::Ingress,
    port_chain: Chain::IngressPort,
    ns_chain: Chain::IngressFromNs,
    pod_chain: Chain::IngressFromPod,
    peer_is_src: true,
};

const EGRESS: DirCtx = DirCtx {
    direction: Direction::Egress,
    port_chain: Chain::EgressPort,
    ns_chain: Chain::EgressToNs,
    pod_chain: Chain::EgressToPod,
    peer_is_src: false,
};

/// Accumulates the pieces `compile` builds up across both directions before being
/// assembled into a [`CompiledPolicy`].
#[derive(Default)]
struct Builder {
    pod_set_names: BTreeSet<String>,
    named_port_set_names: BTreeSet<String>,
    lists: BTreeMap<String, Vec<String>>,
    ingress_cidrs: Vec<CidrSetDef>,
    egress_cidrs: Vec<CidrSetDef>,
    rule_entries: Vec<RuleEntry>,
}

pub fn compile(policy: &NetworkPolicy) -> Result<CompiledPolicy> {
    let metadata = &policy.metadata;
    let namespace = metadata
        .namespace
        .clone()
        .ok_or_else(|| Error::MissingNamespace(metadata.name.clone().unwrap_or_default()))?;
    let name = metadata
        .name
        .clone()
        .ok_or_else(|| Error::MissingName(namespace.clone()))?;

    let spec = policy.spec.clone().unwrap_or_default();
    let pod_selector_hash = kubenp_keys::hash_selector(&spec.pod_selector);

    let types: BTreeSet<String> = spec.policy_types.clone().unwrap_or_else(|| vec!["Ingress".to_string()]).into_iter().collect();
    let wants_ingress = types.contains("Ingress");
    let wants_egress = types.contains("Egress");

    let mut builder = Builder::default();
    let target = build_target(&namespace, &spec.pod_selector, &mut builder)?;

    if wants_ingress {
        let rules = ingress_as_normalized(spec.ingress.as_deref());
        compile_direction(&INGRESS, &namespace, &name, rules.as_deref(), &target, &mut builder)?;
    }
    if wants_egress {
        let rules = egress_as_normalized(spec.egress.as_deref());
        compile_direction(&EGRESS, &namespace, &name, rules.as_deref(), &target, &mut builder)?;
    }

    let pod_sets = builder.pod_set_names.into_iter().map(SetDef::net_hash).collect();
    let named_port_sets = builder.named_port_set_names.into_iter().map(SetDef::ip_port_hash).collect();
    let lists = builder
        .lists
        .into_iter()
        .map(|(name, members)| ListDef { name, members })
        .collect();

    Ok(CompiledPolicy {
        namespace,
        name,
        pod_selector_hash,
        ingress: wants_ingress,
        egress: wants_egress,
        pod_sets,
        named_port_sets,
        lists,
        ingress_cidrs: builder.ingress_cidrs,
        egress_cidrs: builder.egress_cidrs,
        rule_entries: builder.rule_entries,
    })
}

/// A direction-agnostic view over one ingress/egress rule's `ports`/peer list, so
/// both rule kinds share the same emission code (§4.3 bullet 3 is symmetric).
struct NormalizedRule<'a> {
    ports: Option<&'a [NetworkPolicyPort]>,
    peers: Option<&'a [NetworkPolicyPeer]>,
}

/// Egress rules carry `to` where ingress rules carry `from`; reshape into the same
/// peer-field name so `compile_direction` can stay single-bodied.
fn egress_as_normalized(rules: Option<&[NetworkPolicyEgressRule]>) -> Option<Vec<NormalizedRule<'_>>> {
    rules.map(|rules| {
        rules
            .iter()
            .map(|r| NormalizedRule {
                ports: r.ports.as_deref(),
                peers: r.to.as_deref(),
            })
            .collect()
    })
}

fn ingress_as_normalized(rules: Option<&[NetworkPolicyIngressRule]>) -> Option<Vec<NormalizedRule<'_>>> {
    rules.map(|rules| {
        rules
            .iter()
            .map(|r| NormalizedRule {
                ports: r.ports.as_deref(),
                peers: r.from.as_deref(),
            })
            .collect()
    })
}

fn compile_direction(
    ctx: &DirCtx,
    namespace: &str,
    name: &str,
    rules: Option<&[NormalizedRule<'_>]>,
    target: &TargetAtoms,
    builder: &mut Builder,
) -> Result<()> {
    // Bullet 2: kube-system is always reachable regardless of other rules.
    builder.pod_set_names.insert(kube_system_set().to_string());
    builder.rule_entries.push(RuleEntry::new(
        ctx.port_chain,
        always_allow_kube_system(ctx, target),
        Target::Accept,
        format!("{namespace}/{name} always allow kube-system"),
    ));

    if let Some(rules) = rules {
        for (index, rule) in rules.iter().enumerate() {
            compile_rule(ctx, namespace, name, index, rule, target, builder)?;
        }
    }

    // Bullets 1+4 unified: regardless of rule count, a direction this policy
    // selects is isolated by default; the catch-all deny lives in the shared
    // Targets chain so it only takes effect once nothing upstream accepted.
    let (sets, not_sets) = (target.positive.clone(), target.negative.clone());
    let deny_match = if ctx.peer_is_src {
        Match {
            src_sets: sets,
            not_src_sets: not_sets,
            ..Default::default()
        }
    } else {
        Match {
            dst_sets: sets,
            not_dst_sets: not_sets,
            ..Default::default()
        }
    };
    builder.rule_entries.push(RuleEntry::new(
        Chain::Targets,
        deny_match,
        Target::Drop,
        format!("{namespace}/{name} default deny {:?}", ctx.direction),
    ));

    Ok(())
}

fn always_allow_kube_system(ctx: &DirCtx, target: &TargetAtoms) -> Match {
    if ctx.peer_is_src {
        Match {
            src_sets: vec![kube_system_set().to_string()],
            dst_sets: target.positive.clone(),
            not_dst_sets: target.negative.clone(),
            ..Default::default()
        }
    } else {
        Match {
            dst_sets: vec![kube_system_set().to_string()],
            src_sets: target.positive.clone(),
            not_src_sets: target.negative.clone(),
            ..Default::default()
        }
    }
}

fn compile_rule(
    ctx: &DirCtx,
    namespace: &str,
    name: &str,
    index: usize,
    rule: &NormalizedRule<'_>,
    target: &TargetAtoms,
    builder: &mut Builder,
) -> Result<()> {
    let has_ports = rule.ports.map(|p| !p.is_empty()).unwrap_or(false);
    let has_peers = rule.peers.map(|p| !p.is_empty()).unwrap_or(false);

    if !has_ports && !has_peers {
        builder.rule_entries.push(RuleEntry::new(
            ctx.port_chain,
            target_only_match(ctx, target),
            Target::Accept,
            format!("{namespace}/{name} rule {index} allow all"),
        ));
        return Ok(());
    }

    if has_ports {
        for port in rule.ports.unwrap() {
            let entry_match = port_match(ctx, target, port)?;
            builder.rule_entries.push(RuleEntry::new(
                ctx.port_chain,
                entry_match,
                Target::Jump(ctx.ns_chain),
                format!("{namespace}/{name} rule {index} port jump"),
            ));
        }
    } else {
        builder.rule_entries.push(RuleEntry::new(
            ctx.port_chain,
            target_only_match(ctx, target),
            Target::Jump(ctx.ns_chain),
            format!("{namespace}/{name} rule {index} peer jump"),
        ));
    }

    if !has_peers {
        // Ports restrict this rule, not peers: anything that reaches the sub-chain
        // for this target has already cleared the port gate, so it is allowed.
        builder.rule_entries.push(RuleEntry::new(
            ctx.ns_chain,
            target_only_match(ctx, target),
            Target::Accept,
            format!("{namespace}/{name} rule {index} no peer restriction"),
        ));
        return Ok(());
    }

    compile_peers(ctx, namespace, name, index, rule.peers.unwrap(), target, builder)
}

fn target_only_match(ctx: &DirCtx, target: &TargetAtoms) -> Match {
    if ctx.peer_is_src {
        Match {
            dst_sets: target.positive.clone(),
            not_dst_sets: target.negative.clone(),
            ..Default::default()
        }
    } else {
        Match {
            src_sets: target.positive.clone(),
            not_src_sets: target.negative.clone(),
            ..Default::default()
        }
    }
}

fn port_match(ctx: &DirCtx, target: &TargetAtoms, port: &NetworkPolicyPort) -> Result<Match> {
    let mut m = target_only_match(ctx, target);
    match &port.port {
        Some(IntOrString::String(name)) => {
            m.dst_port_set = Some(named_port_set_name(name));
        }
        Some(IntOrString::Int(n)) => {
            m.protocol = Some(protocol_of(port)?);
            m.dst_port = Some(*n as u16);
        }
        None => {
            m.protocol = Some(protocol_of(port)?);
        }
    }
    Ok(m)
}

fn protocol_of(port: &NetworkPolicyPort) -> Result<RProtocol> {
    match port.protocol.as_deref().map(str::to_lowercase).as_deref() {
        None | Some("tcp") => Ok(RProtocol::Tcp),
        Some("udp") => Ok(RProtocol::Udp),
        Some("sctp") => Ok(RProtocol::Sctp),
        Some(other) => Err(Error::UnknownProtocol(other.to_string())),
    }
}

fn compile_peers(
    ctx: &DirCtx,
    namespace: &str,
    name: &str,
    index: usize,
    peers: &[NetworkPolicyPeer],
    target: &TargetAtoms,
    builder: &mut Builder,
) -> Result<()> {
    let mut cidr_elements: Vec<String> = Vec::new();

    for peer in peers {
        match (&peer.ip_block, &peer.namespace_selector, &peer.pod_selector) {
            (Some(block), None, None) => {
                compile_ip_block(ctx, namespace, name, index, block, target, builder, &mut cidr_elements)?;
            }
            (None, Some(ns_sel), None) => {
                compile_namespace_peer(ctx, namespace, name, index, ns_sel, target, builder)?;
            }
            (None, None, Some(pod_sel)) => {
                compile_pod_peer(ctx, namespace, name, index, pod_sel, target, builder)?;
            }
            (None, Some(ns_sel), Some(pod_sel)) => {
                compile_combined_peer(ctx, namespace, name, index, ns_sel, pod_sel, target, builder)?;
            }
            _ => {
                warn!(namespace, name, index, "peer has none or more than one of ipBlock/namespaceSelector/podSelector, skipping");
            }
        }
    }

    if !cidr_elements.is_empty() {
        cidr_elements.sort();
        cidr_elements.dedup();
        let set_name = policy_cidr_set_name(name, namespace, index, ctx.direction);
        let cidr_match = if ctx.peer_is_src {
            Match {
                src_sets: vec![set_name.clone()],
                dst_sets: target.positive.clone(),
                not_dst_sets: target.negative.clone(),
                ..Default::default()
            }
        } else {
            Match {
                dst_sets: vec![set_name.clone()],
                src_sets: target.positive.clone(),
                not_src_sets: target.negative.clone(),
                ..Default::default()
            }
        };
        builder.rule_entries.push(RuleEntry::new(
            ctx.ns_chain,
            cidr_match,
            Target::Accept,
            format!("{namespace}/{name} rule {index} ipBlock cidr"),
        ));
        let def = CidrSetDef {
            name: set_name,
            cidrs: cidr_elements,
        };
        match ctx.direction {
            Direction::Ingress => builder.ingress_cidrs.push(def),
            Direction::Egress => builder.egress_cidrs.push(def),
        }
    }

    Ok(())
}

fn compile_ip_block(
    ctx: &DirCtx,
    namespace: &str,
    name: &str,
    index: usize,
    block: &IPBlock,
    target: &TargetAtoms,
    builder: &mut Builder,
    cidr_elements: &mut Vec<String>,
) -> Result<()> {
    for except in block.except.clone().unwrap_or_default() {
        let m = if ctx.peer_is_src {
            Match {
                src_cidr: Some(except.clone()),
                dst_sets: target.positive.clone(),
                not_dst_sets: target.negative.clone(),
                ..Default::default()
            }
        } else {
            Match {
                dst_cidr: Some(except.clone()),
                src_sets: target.positive.clone(),
                not_src_sets: target.negative.clone(),
                ..Default::default()
            }
        };
        builder.rule_entries.push(
            RuleEntry::new(ctx.ns_chain, m, Target::Drop, format!("{namespace}/{name} rule {index} ipBlock except {except}")).at_front(),
        );
    }
    cidr_elements.push(block.cidr.clone());
    Ok(())
}

fn compile_namespace_peer(
    ctx: &DirCtx,
    namespace: &str,
    name: &str,
    index: usize,
    selector: &LabelSelector,
    target: &TargetAtoms,
    builder: &mut Builder,
) -> Result<()> {
    for combo in flatten_namespace_selector(selector)? {
        let (positive, negative) = resolve_namespace_combo(&combo, builder);
        for neg in &negative {
            builder.rule_entries.push(
                RuleEntry::new(
                    ctx.ns_chain,
                    peer_negative_match(ctx, target, neg),
                    Target::Drop,
                    format!("{namespace}/{name} rule {index} namespaceSelector exclude {neg}"),
                )
                .at_front(),
            );
        }
        builder.rule_entries.push(RuleEntry::new(
            ctx.ns_chain,
            peer_positive_match(ctx, target, &positive),
            Target::Accept,
            format!("{namespace}/{name} rule {index} namespaceSelector"),
        ));
    }
    Ok(())
}

fn compile_pod_peer(
    ctx: &DirCtx,
    namespace: &str,
    name: &str,
    index: usize,
    selector: &LabelSelector,
    target: &TargetAtoms,
    builder: &mut Builder,
) -> Result<()> {
    let parsed = parse_selector(selector, Scope::Pod)?;
    let (mut positive, negative) = expand_parsed(&parsed, builder);
    positive.push(namespace_set_name(namespace));
    positive.sort();
    positive.dedup();
    builder.pod_set_names.insert(namespace_set_name(namespace));

    for neg in &negative {
        builder.rule_entries.push(
            RuleEntry::new(
                ctx.ns_chain,
                peer_negative_match(ctx, target, neg),
                Target::Drop,
                format!("{namespace}/{name} rule {index} podSelector exclude {neg}"),
            )
            .at_front(),
        );
    }
    builder.rule_entries.push(RuleEntry::new(
        ctx.ns_chain,
        peer_positive_match(ctx, target, &positive),
        Target::Accept,
        format!("{namespace}/{name} rule {index} podSelector"),
    ));
    Ok(())
}

fn compile_combined_peer(
    ctx: &DirCtx,
    namespace: &str,
    name: &str,
    index: usize,
    ns_selector: &LabelSelector,
    pod_selector: &LabelSelector,
    target: &TargetAtoms,
    builder: &mut Builder,
) -> Result<()> {
    for combo in flatten_namespace_selector(ns_selector)? {
        let (positive, negative) = resolve_namespace_combo(&combo, builder);
        for neg in &negative {
            builder.rule_entries.push(
                RuleEntry::new(
                    ctx.ns_chain,
                    peer_negative_match(ctx, target, neg),
                    Target::Drop,
                    format!("{namespace}/{name} rule {index} namespaceSelector exclude {neg}"),
                )
                .at_front(),
            );
        }
        builder.rule_entries.push(RuleEntry::new(
            ctx.ns_chain,
            peer_positive_match(ctx, target, &positive),
            Target::Jump(ctx.pod_chain),
            format!("{namespace}/{name} rule {index} namespaceSelector+podSelector namespace half"),
        ));
    }

    let pod_parsed = parse_selector(pod_selector, Scope::Pod)?;
    let (pod_positive, pod_negative) = expand_parsed(&pod_parsed, builder);
    for neg in &pod_negative {
        builder.rule_entries.push(
            RuleEntry::new(
                ctx.pod_chain,
                peer_negative_match(ctx, target, neg),
                Target::Drop,
                format!("{namespace}/{name} rule {index} namespaceSelector+podSelector exclude {neg}"),
            )
            .at_front(),
        );
    }
    builder.rule_entries.push(RuleEntry::new(
        ctx.pod_chain,
        peer_positive_match(ctx, target, &pod_positive),
        Target::Accept,
        format!("{namespace}/{name} rule {index} namespaceSelector+podSelector pod half"),
    ));
    Ok(())
}

fn resolve_namespace_combo(combo: &ParsedSelector, builder: &mut Builder) -> (Vec<String>, Vec<String>) {
    if combo.positive.is_empty() && combo.negative.is_empty() {
        builder.pod_set_names.insert(all_namespaces_list().to_string());
        return (vec![all_namespaces_list().to_string()], vec![]);
    }
    let (positive, negative) = expand_parsed(combo, builder);
    (positive, negative)
}

fn peer_positive_match(ctx: &DirCtx, target: &TargetAtoms, peer_sets: &[String]) -> Match {
    if ctx.peer_is_src {
        Match {
            src_sets: peer_sets.to_vec(),
            dst_sets: target.positive.clone(),
            not_dst_sets: target.negative.clone(),
            ..Default::default()
        }
    } else {
        Match {
            dst_sets: peer_sets.to_vec(),
            src_sets: target.positive.clone(),
            not_src_sets: target.negative.clone(),
            ..Default::default()
        }
    }
}

fn peer_negative_match(ctx: &DirCtx, target: &TargetAtoms, peer_set: &str) -> Match {
    peer_positive_match(ctx, target, std::slice::from_ref(&peer_set.to_string()))
}

fn build_target(namespace: &str, selector: &LabelSelector, builder: &mut Builder) -> Result<TargetAtoms> {
    let parsed = parse_selector(selector, Scope::Pod)?;
    let (mut positive, negative) = expand_parsed(&parsed, builder);
    positive.push(namespace_set_name(namespace));
    builder.pod_set_names.insert(namespace_set_name(namespace));
    positive.sort();
    positive.dedup();
    Ok(TargetAtoms { positive, negative })
}

/// Registers a parsed selector's atoms/lists into the builder and returns its
/// flattened positive/negative set names, folding multi-value buckets in as extra
/// list-typed atoms (positive if `In`, negative if `NotIn`).
fn expand_parsed(parsed: &ParsedSelector, builder: &mut Builder) -> (Vec<String>, Vec<String>) {
    let mut positive = parsed.positive.clone();
    let mut negative = parsed.negative.clone();
    for s in &positive {
        builder.pod_set_names.insert(s.clone());
    }
    for s in &negative {
        builder.pod_set_names.insert(s.clone());
    }
    for bucket in &parsed.multi {
        for member in &bucket.members {
            builder.pod_set_names.insert(member.clone());
        }
        builder
            .lists
            .entry(bucket.list_name.clone())
            .or_insert_with(|| bucket.members.clone());
        if bucket.negate {
            negative.push(bucket.list_name.clone());
        } else {
            positive.push(bucket.list_name.clone());
        }
    }
    positive.sort();
    positive.dedup();
    negative.sort();
    negative.dedup();
    (positive, negative)
}

#[cfg(test)]
mod test {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::api::networking::v1::NetworkPolicySpec;
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn policy(namespace: &str, name: &str, spec: NetworkPolicySpec) -> NetworkPolicy {
        NetworkPolicy {
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(spec),
            status: None,
        }
    }

    #[test]
    fn no_rules_still_emits_kube_system_allow_and_default_deny() {
        let policy = policy(
            "dev",
            "deny-all",
            NetworkPolicySpec {
                pod_selector: LabelSelector {
                    match_labels: Some(labels(&[("app", "web")])),
                    ..Default::default()
                },
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: None,
                egress: None,
            },
        );
        let compiled = compile(&policy).unwrap();
        assert!(compiled.ingress);
        assert!(!compiled.egress);
        assert!(
            compiled
                .rule_entries
                .iter()
                .any(|e| e.chain == Chain::Targets && e.target == Target::Drop)
        );
        assert!(
            compiled
                .rule_entries
                .iter()
                .any(|e| e.chain == Chain::IngressPort && e.matches.src_sets == vec![kube_system_set().to_string()])
        );
    }

    #[test]
    fn ip_block_except_precedes_cidr_accept() {
        let policy = policy(
            "dev",
            "cidr-policy",
            NetworkPolicySpec {
                pod_selector: LabelSelector {
                    match_labels: Some(labels(&[("app", "web")])),
                    ..Default::default()
                },
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    ports: None,
                    from: Some(vec![NetworkPolicyPeer {
                        ip_block: Some(IPBlock {
                            cidr: "10.0.0.0/8".to_string(),
                            except: Some(vec!["10.1.0.0/16".to_string()]),
                        }),
                        namespace_selector: None,
                        pod_selector: None,
                    }]),
                }]),
                egress: None,
            },
        );
        let compiled = compile(&policy).unwrap();
        assert_eq!(compiled.ingress_cidrs.len(), 1);
        assert_eq!(compiled.ingress_cidrs[0].cidrs, vec!["10.0.0.0/8".to_string()]);
        let drop = compiled
            .rule_entries
            .iter()
            .find(|e| e.target == Target::Drop && e.matches.src_cidr.as_deref() == Some("10.1.0.0/16"))
            .unwrap();
        assert_eq!(drop.position, Position::Front);
        let accept = compiled
            .rule_entries
            .iter()
            .find(|e| e.target == Target::Accept && e.matches.src_sets.iter().any(|s| s.starts_with("cidr-policy")))
            .unwrap();
        assert_eq!(accept.position, Position::Back);
    }

    #[test]
    fn unspecified_cidr_policy_declares_split_free_element_list() {
        let policy = policy(
            "dev",
            "open-cidr",
            NetworkPolicySpec {
                pod_selector: LabelSelector::default(),
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    ports: None,
                    from: Some(vec![NetworkPolicyPeer {
                        ip_block: Some(IPBlock {
                            cidr: "0.0.0.0/0".to_string(),
                            except: None,
                        }),
                        namespace_selector: None,
                        pod_selector: None,
                    }]),
                }]),
                egress: None,
            },
        );
        let compiled = compile(&policy).unwrap();
        // PT itself declares the raw CIDR; the 0.0.0.0/0 split is IPSE's job at
        // element-install time, not the translator's.
        assert_eq!(compiled.ingress_cidrs[0].cidrs, vec!["0.0.0.0/0".to_string()]);
    }

    #[test]
    fn namespace_selector_with_multi_value_in_emits_one_accept_per_value() {
        let policy = policy(
            "dev",
            "multi-ns",
            NetworkPolicySpec {
                pod_selector: LabelSelector::default(),
                policy_types: Some(vec!["Egress".to_string()]),
                ingress: None,
                egress: Some(vec![NetworkPolicyEgressRule {
                    ports: None,
                    to: Some(vec![NetworkPolicyPeer {
                        ip_block: None,
                        pod_selector: None,
                        namespace_selector: Some(LabelSelector {
                            match_expressions: Some(vec![k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement {
                                key: "ns".to_string(),
                                operator: "In".to_string(),
                                values: Some(vec!["x".to_string(), "y".to_string()]),
                            }]),
                            ..Default::default()
                        }),
                    }]),
                }]),
            },
        );
        let compiled = compile(&policy).unwrap();
        let accepts: Vec<_> = compiled
            .rule_entries
            .iter()
            .filter(|e| e.chain == Chain::EgressToNs && e.target == Target::Accept)
            .collect();
        assert_eq!(accepts.len(), 2);
    }

    #[test]
    fn named_port_declares_an_ip_port_hash_set() {
        let policy = policy(
            "dev",
            "named-port",
            NetworkPolicySpec {
                pod_selector: LabelSelector::default(),
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    ports: Some(vec![NetworkPolicyPort {
                        protocol: None,
                        port: Some(IntOrString::String("http".to_string())),
                        end_port: None,
                    }]),
                    from: None,
                }]),
                egress: None,
            },
        );
        let compiled = compile(&policy).unwrap();
        assert_eq!(compiled.named_port_sets.len(), 1);
        assert_eq!(compiled.named_port_sets[0].name, "namedport:http");
    }

    #[test]
    fn ports_only_rule_falls_through_to_an_unconditional_accept() {
        let policy = policy(
            "dev",
            "ports-only",
            NetworkPolicySpec {
                pod_selector: LabelSelector::default(),
                policy_types: Some(vec!["Ingress".to_string()]),
                ingress: Some(vec![NetworkPolicyIngressRule {
                    ports: Some(vec![NetworkPolicyPort {
                        protocol: Some("TCP".to_string()),
                        port: Some(IntOrString::Int(80)),
                        end_port: None,
                    }]),
                    from: None,
                }]),
                egress: None,
            },
        );
        let compiled = compile(&policy).unwrap();
        assert!(
            compiled
                .rule_entries
                .iter()
                .any(|e| e.chain == Chain::IngressFromNs && e.target == Target::Accept)
        );
    }
}

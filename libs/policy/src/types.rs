use kubenp_ipset::SetKind;
use kubenp_ruleengine::RuleEntry;

/// A membership set PT depends on but does not itself populate: label/namespace sets
/// are maintained by the pod/namespace controllers (§4.4.1/§4.4.2). PT only declares
/// them so the installer can create them ahead of the rules that reference them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SetDef {
    pub name: String,
    pub kind: SetKind,
}

impl SetDef {
    pub fn net_hash(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SetKind::NetHash,
        }
    }

    pub fn ip_port_hash(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SetKind::IpPortHash,
        }
    }
}

/// A `list:set` PT both declares and fully owns the membership of: the member names
/// are other label sets, fixed by the policy's own selector text rather than by pod
/// events, so the installer adds them once at install time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ListDef {
    pub name: String,
    pub members: Vec<String>,
}

/// A policy-scoped CIDR set (`hash:net`) PT both declares and populates: its elements
/// are exactly the `ipBlock.cidr` values of the peers in one rule, so — unlike label
/// sets — PT itself owns the element list rather than deferring to a controller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CidrSetDef {
    pub name: String,
    pub cidrs: Vec<String>,
}

/// The deterministic output of compiling one `NetworkPolicy` (§4.3): the sets/lists
/// it depends on, the CIDR sets it owns, and the ordered rule entries to install.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CompiledPolicy {
    pub namespace: String,
    pub name: String,
    pub pod_selector_hash: String,
    pub ingress: bool,
    pub egress: bool,
    pub pod_sets: Vec<SetDef>,
    pub named_port_sets: Vec<SetDef>,
    pub lists: Vec<ListDef>,
    pub ingress_cidrs: Vec<CidrSetDef>,
    pub egress_cidrs: Vec<CidrSetDef>,
    pub rule_entries: Vec<RuleEntry>,
}

impl CompiledPolicy {
    /// The owner key every IPSE/RLE call for this policy is refcounted under.
    pub fn owner_key(&self) -> String {
        format!("netpol/{}/{}", self.namespace, self.name)
    }
}

use std::collections::BTreeMap;

/// Cluster-unique pod key (§3): `<prefix>/<namespace>/<name>/<uid>`. This is the
/// opaque owner key every IPSE/RLE mutation on behalf of a pod is refcounted under.
pub fn pod_key(namespace: &str, name: &str, uid: &str) -> String {
    format!("pod/{namespace}/{name}/{uid}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl From<&str> for PodPhase {
    fn from(value: &str) -> Self {
        match value {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PortProtocol {
    Tcp,
    Udp,
    Sctp,
}

impl From<&str> for PortProtocol {
    fn from(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "UDP" => PortProtocol::Udp,
            "SCTP" => PortProtocol::Sctp,
            _ => PortProtocol::Tcp,
        }
    }
}

/// One named container port (§3), the unit the named-port sets index on.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NamedPort {
    pub name: String,
    pub protocol: PortProtocol,
    pub port: u16,
}

/// One pod's cached state (§3). Invariant enforced by the caller before insertion:
/// non-host-networked, non-empty IP, not Succeeded/Failed (§3, §4.4.1 "HostNetwork
/// pods are never materialised").
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PodEntry {
    pub key: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub ip: String,
    pub labels: BTreeMap<String, String>,
    pub named_ports: Vec<NamedPort>,
    pub resource_version: Option<u64>,
    pub phase: PodPhase,
}

impl PodEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
        ip: impl Into<String>,
        labels: BTreeMap<String, String>,
        named_ports: Vec<NamedPort>,
        resource_version: Option<u64>,
        phase: PodPhase,
    ) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        let uid = uid.into();
        let key = pod_key(&namespace, &name, &uid);
        Self {
            key,
            namespace,
            name,
            uid,
            ip: ip.into(),
            labels,
            named_ports,
            resource_version,
            phase,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pod_key_embeds_namespace_name_and_uid() {
        assert_eq!(pod_key("dev", "p1", "abc-123"), "pod/dev/p1/abc-123");
    }

    #[test]
    fn terminal_phases_are_succeeded_and_failed_only() {
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
        assert!(!PodPhase::Pending.is_terminal());
    }
}

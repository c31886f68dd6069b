use sha2::{Digest, Sha256};

/// `ipset` refuses names longer than `IPSET_MAXNAMELEN - 1` (31 bytes). Any name
/// built from user-controlled strings (namespace/label/policy names) must be run
/// through this before being handed to the backend.
const IPSET_MAX_NAME_LEN: usize = 31;
const HASH_SUFFIX_LEN: usize = 8;

pub const ALL_NAMESPACES_LIST: &str = "ns-all";
pub const KUBE_SYSTEM_SET: &str = "ns-kube-system";
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    fn suffix(self) -> &'static str {
        match self {
            Direction::Ingress => "in",
            Direction::Egress => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedPortProtocol {
    Tcp,
    Udp,
    Sctp,
    Unspecified,
}

impl NamedPortProtocol {
    /// Protocol prefixes are normalised to lower case for idempotent diffing.
    fn prefix(self) -> &'static str {
        match self {
            NamedPortProtocol::Tcp => "tcp:",
            NamedPortProtocol::Udp => "udp:",
            NamedPortProtocol::Sctp => "sctp:",
            NamedPortProtocol::Unspecified => "",
        }
    }
}

/// Truncate `name` to fit the kernel's 31-byte `ipset` name limit, replacing the
/// truncated tail with a short stable hash so collisions between two long names that
/// share a common prefix remain distinguishable.
pub fn sanitize_ipset_name(name: &str) -> String {
    if name.len() <= IPSET_MAX_NAME_LEN {
        return name.to_string();
    }
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let suffix = hex_prefix(&digest, HASH_SUFFIX_LEN);
    let keep = IPSET_MAX_NAME_LEN - HASH_SUFFIX_LEN - 1;
    let prefix: String = name.chars().take(keep).collect();
    format!("{prefix}-{suffix}")
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    use std::fmt::Write;
    let mut hex = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(hex, "{b:02x}");
    }
    hex.truncate(len);
    hex
}

pub fn namespace_set_name(namespace: &str) -> String {
    sanitize_ipset_name(&format!("ns-{namespace}"))
}

pub fn label_set_name(key: &str) -> String {
    sanitize_ipset_name(key)
}

pub fn label_kv_set_name(key: &str, value: &str) -> String {
    sanitize_ipset_name(&format!("{key}:{value}"))
}

pub fn ns_label_set_name(key: &str) -> String {
    sanitize_ipset_name(&format!("ns-{key}"))
}

pub fn ns_label_kv_set_name(key: &str, value: &str) -> String {
    sanitize_ipset_name(&format!("ns-{key}:{value}"))
}

/// Second-level set backing a multi-value `In`/`NotIn` match expression. The set
/// name is keyed by the *unordered* tuple of values (sorted before hashing), so
/// `{ns In [x,y]}` and `{ns In [y,x]}` always name the same set.
pub fn multi_value_set_name(key: &str, values: &[String], negate: bool) -> String {
    let mut sorted: Vec<&str> = values.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    for v in &sorted {
        hasher.update(b"\0");
        hasher.update(v.as_bytes());
    }
    let digest = hasher.finalize();
    let hash = hex_prefix(&digest, 10);
    let prefix = if negate { "!" } else { "" };
    sanitize_ipset_name(&format!("{prefix}{key}:mv-{hash}"))
}

pub fn named_port_set_name(port_name: &str) -> String {
    sanitize_ipset_name(&format!("namedport:{port_name}"))
}

/// Composite `hash:ip,port` element for a named-port set: `<ip>,<proto-prefix><port>`.
pub fn named_port_element(ip: &str, proto: NamedPortProtocol, port: u16) -> String {
    format!("{ip},{}{port}", proto.prefix())
}

/// Policy-scoped CIDR set name: `<policy>-in-ns-<ns>-<index>{in|out}`.
pub fn policy_cidr_set_name(policy: &str, namespace: &str, index: usize, dir: Direction) -> String {
    sanitize_ipset_name(&format!(
        "{policy}-in-ns-{namespace}-{index}{}",
        dir.suffix()
    ))
}

pub fn all_namespaces_list() -> &'static str {
    ALL_NAMESPACES_LIST
}

pub fn kube_system_set() -> &'static str {
    KUBE_SYSTEM_SET
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn short_names_pass_through() {
        assert_eq!(namespace_set_name("dev"), "ns-dev");
        assert_eq!(label_set_name("app"), "app");
        assert_eq!(label_kv_set_name("app", "web"), "app:web");
        assert_eq!(ns_label_set_name("team"), "ns-team");
        assert_eq!(ns_label_kv_set_name("team", "sre"), "ns-team:sre");
    }

    #[test]
    fn long_names_are_hashed_and_fit_the_kernel_limit() {
        let long = "a".repeat(60);
        let sanitized = sanitize_ipset_name(&long);
        assert!(sanitized.len() <= IPSET_MAX_NAME_LEN);
        assert_ne!(sanitized, long);
        // deterministic
        assert_eq!(sanitized, sanitize_ipset_name(&long));
    }

    #[test]
    fn multi_value_set_name_is_order_independent() {
        let a = multi_value_set_name("ns", &["x".to_string(), "y".to_string()], false);
        let b = multi_value_set_name("ns", &["y".to_string(), "x".to_string()], false);
        assert_eq!(a, b);
        let negated = multi_value_set_name("ns", &["x".to_string(), "y".to_string()], true);
        assert_ne!(a, negated);
        assert!(negated.starts_with('!'));
    }

    #[test]
    fn named_port_element_with_and_without_protocol() {
        assert_eq!(
            named_port_element("10.0.0.5", NamedPortProtocol::Tcp, 80),
            "10.0.0.5,tcp:80"
        );
        assert_eq!(
            named_port_element("10.0.0.5", NamedPortProtocol::Unspecified, 80),
            "10.0.0.5,80"
        );
    }

    #[test]
    fn policy_cidr_set_name_matches_convention() {
        assert_eq!(
            policy_cidr_set_name("web-policy", "dev", 0, Direction::Ingress),
            "web-policy-in-ns-dev-0in"
        );
        assert_eq!(
            policy_cidr_set_name("web-policy", "dev", 1, Direction::Egress),
            "web-policy-in-ns-dev-1out"
        );
    }
}

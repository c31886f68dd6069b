/// Kernel set types the engine manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum SetKind {
    /// `hash:net` — CIDR elements (namespace sets, policy-scoped CIDR sets).
    #[default]
    NetHash,
    /// `hash:ip,port` — named-port composite elements.
    IpPortHash,
    /// `list:set` — a named collection of member set names.
    ListOfSets,
}

impl SetKind {
    pub(crate) fn ipset_type(self) -> &'static str {
        match self {
            SetKind::NetHash => "hash:net",
            SetKind::IpPortHash => "hash:ip,port",
            SetKind::ListOfSets => "list:set",
        }
    }
}

/// `0.0.0.0/0` is rejected by `hash:net` sets; it must be represented as the split
/// pair of /1 halves
pub const UNSPECIFIED_CIDR: &str = "0.0.0.0/0";
pub const UNSPECIFIED_CIDR_SPLIT: [&str; 2] = ["1.0.0.0/1", "128.0.0.0/1"];

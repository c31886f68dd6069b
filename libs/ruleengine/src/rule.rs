use std::fmt::Write as _;

/// The well-known chains RLE owns, rooted in the filter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Chain {
    IngressPort,
    IngressFromNs,
    IngressFromPod,
    EgressPort,
    EgressToNs,
    EgressToPod,
    /// Default-deny drops for policy-targeted sets.
    Targets,
}

impl Chain {
    pub fn name(self) -> &'static str {
        match self {
            Chain::IngressPort => "NPM-ING-PORT",
            Chain::IngressFromNs => "NPM-ING-FROM-NS",
            Chain::IngressFromPod => "NPM-ING-FROM-POD",
            Chain::EgressPort => "NPM-EG-PORT",
            Chain::EgressToNs => "NPM-EG-TO-NS",
            Chain::EgressToPod => "NPM-EG-TO-POD",
            Chain::Targets => "NPM-TARGETS",
        }
    }

    pub fn all() -> [Chain; 7] {
        [
            Chain::IngressPort,
            Chain::IngressFromNs,
            Chain::IngressFromPod,
            Chain::EgressPort,
            Chain::EgressToNs,
            Chain::EgressToPod,
            Chain::Targets,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

/// Where a rule's verdict sends matching traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Target {
    Accept,
    Drop,
    Jump(Chain),
}

impl Target {
    fn as_str(self) -> String {
        match self {
            Target::Accept => "ACCEPT".to_string(),
            Target::Drop => "DROP".to_string(),
            Target::Jump(chain) => chain.name().to_string(),
        }
    }
}

/// Whether a rule is inserted ahead of existing entries or appended after them.
/// IPBlock except rules must precede the CIDR allow rule they qualify (4.3), so
/// they're inserted at the front of their chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Position {
    Front,
    Back,
}

/// Match criteria for a rule entry. `None`/empty fields are omitted from the
/// generated iptables match spec. `src_sets`/`dst_sets` hold more than one set name
/// when a compound `LabelSelector` (multiple `matchLabels`/`matchExpressions`,
/// logically ANDed) is matched: iptables ANDs match extensions within a single rule
/// natively, so a compound selector becomes one rule with one `-m set` clause per
/// label rather than a separately-computed intersection set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Match {
    pub src_sets: Vec<String>,
    pub dst_sets: Vec<String>,
    /// Negated membership clauses (`-m set ! --match-set <set> src/dst`): used for
    /// `NotIn`/`DoesNotExist` atoms of a policy's own target selector, where the
    /// match can be inlined into the rule instead of a preceding DROP entry.
    pub not_src_sets: Vec<String>,
    pub not_dst_sets: Vec<String>,
    pub src_cidr: Option<String>,
    pub dst_cidr: Option<String>,
    pub protocol: Option<Protocol>,
    pub dst_port: Option<u16>,
    /// A `hash:ip,port` named-port set, matched against both destination fields at
    /// once (`--match-set <set> dst,dst`) rather than IP and port separately.
    pub dst_port_set: Option<String>,
}

impl Match {
    /// Convenience constructor for the common single-set case.
    pub fn with_src_set(set: impl Into<String>) -> Self {
        Self {
            src_sets: vec![set.into()],
            ..Default::default()
        }
    }

    pub fn with_dst_set(set: impl Into<String>) -> Self {
        Self {
            dst_sets: vec![set.into()],
            ..Default::default()
        }
    }

    fn write_spec(&self, out: &mut String) {
        if let Some(cidr) = &self.src_cidr {
            let _ = write!(out, " -s {cidr}");
        }
        if let Some(cidr) = &self.dst_cidr {
            let _ = write!(out, " -d {cidr}");
        }
        for set in &self.src_sets {
            let _ = write!(out, " -m set --match-set {set} src");
        }
        for set in &self.dst_sets {
            let _ = write!(out, " -m set --match-set {set} dst");
        }
        for set in &self.not_src_sets {
            let _ = write!(out, " -m set ! --match-set {set} src");
        }
        for set in &self.not_dst_sets {
            let _ = write!(out, " -m set ! --match-set {set} dst");
        }
        if let Some(proto) = self.protocol {
            let _ = write!(out, " -p {}", proto.as_str());
            if let Some(port) = self.dst_port {
                let _ = write!(out, " -m {} --dport {port}", proto.as_str());
            }
        } else if let Some(port) = self.dst_port {
            let _ = write!(out, " -p tcp -m tcp --dport {port}");
        }
        if let Some(set) = &self.dst_port_set {
            let _ = write!(out, " -m set --match-set {set} dst,dst");
        }
    }
}

/// A single entry to apply to one of RLE's chains: `(chain, match specs, target)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RuleEntry {
    pub chain: Chain,
    pub matches: Match,
    pub target: Target,
    pub position: Position,
    pub comment: String,
}

impl RuleEntry {
    pub fn new(chain: Chain, matches: Match, target: Target, comment: impl Into<String>) -> Self {
        Self {
            chain,
            matches,
            target,
            position: Position::Back,
            comment: comment.into(),
        }
    }

    pub fn at_front(mut self) -> Self {
        self.position = Position::Front;
        self
    }

    /// Render the iptables argument spec for this entry, excluding the leading
    /// `-A <chain>`/`-I <chain> 1`, which the caller supplies depending on table and
    /// direction.
    pub fn spec(&self) -> String {
        let mut out = String::new();
        self.matches.write_spec(&mut out);
        let _ = write!(
            out,
            " -m comment --comment \"{}\" -j {}",
            self.comment,
            self.target.as_str()
        );
        out.trim_start().to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn spec_orders_cidr_before_set_before_protocol() {
        let entry = RuleEntry::new(
            Chain::IngressFromNs,
            Match {
                dst_cidr: Some("10.0.0.0/8".to_string()),
                src_sets: vec!["ns-a".to_string()],
                protocol: Some(Protocol::Tcp),
                dst_port: Some(80),
                ..Default::default()
            },
            Target::Accept,
            "allow from ns-a",
        );
        assert_eq!(
            entry.spec(),
            r#"-d 10.0.0.0/8 -m set --match-set ns-a src -p tcp -m tcp --dport 80 -m comment --comment "allow from ns-a" -j ACCEPT"#
        );
    }

    #[test]
    fn jump_target_renders_chain_name() {
        let entry = RuleEntry::new(Chain::IngressPort, Match::default(), Target::Jump(Chain::IngressFromNs), "jump");
        assert!(entry.spec().ends_with("-j NPM-ING-FROM-NS"));
    }

    #[test]
    fn negated_set_renders_inline_set_negation() {
        let entry = RuleEntry::new(
            Chain::IngressPort,
            Match {
                dst_sets: vec!["ns-dev".to_string()],
                not_dst_sets: vec!["tier:back".to_string()],
                ..Default::default()
            },
            Target::Drop,
            "default deny dev except tier:back",
        );
        assert_eq!(
            entry.spec(),
            r#"-m set --match-set ns-dev dst -m set ! --match-set tier:back dst -m comment --comment "default deny dev except tier:back" -j DROP"#
        );
    }

    #[test]
    fn named_port_set_matches_both_destination_dimensions() {
        let entry = RuleEntry::new(
            Chain::IngressPort,
            Match {
                dst_sets: vec!["app:web".to_string()],
                dst_port_set: Some("namedport:http".to_string()),
                ..Default::default()
            },
            Target::Accept,
            "named port http",
        );
        assert_eq!(
            entry.spec(),
            r#"-m set --match-set app:web dst -m set --match-set namedport:http dst,dst -m comment --comment "named port http" -j ACCEPT"#
        );
    }

    #[test]
    fn compound_selector_ands_multiple_set_matches() {
        let entry = RuleEntry::new(
            Chain::IngressFromPod,
            Match {
                dst_sets: vec!["app:web".to_string(), "tier:front".to_string()],
                ..Default::default()
            },
            Target::Accept,
            "compound selector",
        );
        assert_eq!(
            entry.spec(),
            r#"-m set --match-set app:web dst -m set --match-set tier:front dst -m comment --comment "compound selector" -j ACCEPT"#
        );
    }
}

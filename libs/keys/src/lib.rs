//! Stable names for ipset/iptables objects and canonical selector hashing.
//!
//! Every name the engine hands to the `ipset`/`iptables` backends is derived here so
//! that the same logical object (a namespace, a label bucket, a policy-scoped CIDR
//! set) always produces the same kernel-visible name, independent of map iteration
//! order or event replay order.

mod names;
mod selector;
mod version;

pub use names::{
    Direction, NamedPortProtocol, all_namespaces_list, kube_system_set, label_kv_set_name,
    label_set_name, multi_value_set_name, named_port_element, named_port_set_name,
    namespace_set_name, ns_label_kv_set_name, ns_label_set_name, policy_cidr_set_name,
    sanitize_ipset_name,
};
pub use selector::{CanonicalSelector, canonicalize_selector, hash_selector};
pub use version::parse_resource_version;

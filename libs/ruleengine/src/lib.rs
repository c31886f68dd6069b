//! The Rule Engine (RLE): a well-known chain tree rooted in the filter table, applied
//! and retracted idempotently through the `iptables`/`ip6tables` binaries.

mod backend;
mod engine;
mod error;
mod rule;

pub use backend::{IptablesBackend, RuleBackend};
pub use engine::RuleEngine;
pub use error::{Error, Result};
pub use rule::{Chain, Match, Position, Protocol, RuleEntry, Target};

use std::collections::HashMap;
use std::path::Path;

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::backend::{IptablesBackend, RuleBackend};
use crate::error::Result;
use crate::rule::{Chain, Position, RuleEntry};

const FILTER_TABLE: &str = "filter";

/// Owner-refcounted key identifying one physical rule: its chain plus its rendered
/// spec. Two entries with identical content share one kernel rule.
type RuleKey = (Chain, String);

#[derive(Default)]
struct RuleRecord {
    owners: HashMap<String, u32>,
}

/// The Rule Engine (RLE): owns the well-known chain tree rooted in the filter table
/// and applies/retracts rule entries against it idempotently.
pub struct RuleEngine<B: RuleBackend = IptablesBackend> {
    backend: B,
    rules: RwLock<HashMap<RuleKey, RuleRecord>>,
}

impl RuleEngine<IptablesBackend> {
    pub fn new(ipv6: bool) -> Result<Self> {
        Ok(Self::with_backend(IptablesBackend::new(ipv6)?))
    }
}

impl<B: RuleBackend> RuleEngine<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Create every well-known chain and wire the jump rules into FORWARD. Idempotent:
    /// chains and jumps that already exist are left untouched.
    #[instrument(skip(self))]
    pub async fn init_chains(&self) -> Result<()> {
        for chain in Chain::all() {
            self.backend.new_chain(FILTER_TABLE, chain.name()).await?;
        }

        let ingress_jump = format!(
            "-m comment --comment \"network policy ingress admission\" -j {}",
            Chain::IngressPort.name()
        );
        let egress_jump = format!(
            "-m comment --comment \"network policy egress admission\" -j {}",
            Chain::EgressPort.name()
        );
        let targets_jump = format!(
            "-m comment --comment \"network policy default deny\" -j {}",
            Chain::Targets.name()
        );
        // Inserted front-to-back in reverse so FORWARD reads, top to bottom:
        // ingress admission, egress admission, default deny. An ACCEPT verdict in
        // either port chain terminates traversal before the default-deny chain is
        // ever reached; only flows that neither chain accepted fall through to it.
        for jump in [&targets_jump, &egress_jump, &ingress_jump] {
            if !self
                .backend
                .rule_exists(FILTER_TABLE, "FORWARD", jump)
                .await?
            {
                self.backend
                    .insert_front(FILTER_TABLE, "FORWARD", jump)
                    .await?;
            }
        }
        debug!("chain tree initialized");
        Ok(())
    }

    /// Remove the jump rules and every well-known chain. Tolerates partial
    /// initialization: failures to remove one chain don't stop the rest.
    #[instrument(skip(self))]
    pub async fn uninit_chains(&self) -> Result<()> {
        let ingress_jump = format!(
            "-m comment --comment \"network policy ingress admission\" -j {}",
            Chain::IngressPort.name()
        );
        let egress_jump = format!(
            "-m comment --comment \"network policy egress admission\" -j {}",
            Chain::EgressPort.name()
        );
        let targets_jump = format!(
            "-m comment --comment \"network policy default deny\" -j {}",
            Chain::Targets.name()
        );
        for jump in [&ingress_jump, &egress_jump, &targets_jump] {
            if let Err(err) = self.backend.delete(FILTER_TABLE, "FORWARD", jump).await {
                warn!(%err, "failed to remove jump rule during uninit");
            }
        }
        for chain in Chain::all() {
            if let Err(err) = self.backend.flush_chain(FILTER_TABLE, chain.name()).await {
                warn!(chain = chain.name(), %err, "failed to flush chain during uninit");
            }
            if let Err(err) = self.backend.delete_chain(FILTER_TABLE, chain.name()).await {
                warn!(chain = chain.name(), %err, "failed to delete chain during uninit");
            }
        }
        Ok(())
    }

    /// Apply an entry on behalf of `owner`. The underlying iptables rule is only
    /// inserted once per distinct (chain, spec) regardless of how many owners
    /// reference it.
    #[instrument(skip(self, entry))]
    pub async fn add(&self, owner: &str, entry: &RuleEntry) -> Result<()> {
        let spec = entry.spec();
        let key = (entry.chain, spec.clone());
        let mut rules = self.rules.write().await;
        let record = rules.entry(key).or_default();

        if record.owners.is_empty() {
            match entry.position {
                Position::Back => {
                    self.backend
                        .append_unique(FILTER_TABLE, entry.chain.name(), &spec)
                        .await?;
                }
                Position::Front => {
                    self.backend
                        .insert_front(FILTER_TABLE, entry.chain.name(), &spec)
                        .await?;
                }
            }
        }
        *record.owners.entry(owner.to_string()).or_insert(0) += 1;
        Ok(())
    }

    /// Retract an entry on behalf of `owner`. The kernel rule is only removed once no
    /// owner references it; on kernel failure the refcount is restored.
    #[instrument(skip(self, entry))]
    pub async fn delete(&self, owner: &str, entry: &RuleEntry) -> Result<()> {
        let spec = entry.spec();
        let key = (entry.chain, spec.clone());
        let mut rules = self.rules.write().await;
        let Some(record) = rules.get_mut(&key) else {
            return Ok(());
        };
        let Some(count) = record.owners.get_mut(owner) else {
            return Ok(());
        };
        *count -= 1;
        let owner_gone = *count == 0;
        if owner_gone {
            record.owners.remove(owner);
        }
        if record.owners.is_empty() {
            if let Err(err) = self.backend.delete(FILTER_TABLE, entry.chain.name(), &spec).await {
                record.owners.insert(owner.to_string(), 1);
                warn!(%err, "iptables delete failed, reverted owner map");
                return Err(err);
            }
            rules.remove(&key);
        }
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.backend.save(path).await
    }

    pub async fn restore(&self, path: &Path) -> Result<()> {
        self.backend.restore(path).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rule::{Match, Target};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl RecordingBackend {
        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RuleBackend for RecordingBackend {
        async fn new_chain(&self, _table: &str, _chain: &str) -> Result<()> {
            Ok(())
        }
        async fn chain_exists(&self, _table: &str, _chain: &str) -> Result<bool> {
            Ok(true)
        }
        async fn append_unique(&self, table: &str, chain: &str, rule: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("append".into(), format!("{table}/{chain}"), rule.into()));
            Ok(())
        }
        async fn insert_front(&self, table: &str, chain: &str, rule: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("insert".into(), format!("{table}/{chain}"), rule.into()));
            Ok(())
        }
        async fn delete(&self, table: &str, chain: &str, rule: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(("delete".into(), format!("{table}/{chain}"), rule.into()));
            Ok(())
        }
        async fn flush_chain(&self, _table: &str, _chain: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_chain(&self, _table: &str, _chain: &str) -> Result<()> {
            Ok(())
        }
        async fn rule_exists(&self, _table: &str, _chain: &str, _rule: &str) -> Result<bool> {
            Ok(false)
        }
        async fn save(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        async fn restore(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn sample_entry() -> RuleEntry {
        RuleEntry::new(
            Chain::IngressFromNs,
            Match {
                src_sets: vec!["ns-a".to_string()],
                ..Default::default()
            },
            Target::Accept,
            "allow from ns-a",
        )
    }

    #[tokio::test]
    async fn add_shares_identical_rule_across_owners() {
        let engine = RuleEngine::with_backend(RecordingBackend::default());
        let entry = sample_entry();
        engine.add("policy-a", &entry).await.unwrap();
        engine.add("policy-b", &entry).await.unwrap();

        let inserts = engine
            .backend
            .calls()
            .into_iter()
            .filter(|(op, _, _)| op == "append")
            .count();
        assert_eq!(inserts, 1);
    }

    #[tokio::test]
    async fn delete_only_retracts_once_last_owner_leaves() {
        let engine = RuleEngine::with_backend(RecordingBackend::default());
        let entry = sample_entry();
        engine.add("policy-a", &entry).await.unwrap();
        engine.add("policy-b", &entry).await.unwrap();

        engine.delete("policy-a", &entry).await.unwrap();
        let deletes_before = engine.backend.calls().into_iter().filter(|(op, _, _)| op == "delete").count();
        assert_eq!(deletes_before, 0);

        engine.delete("policy-b", &entry).await.unwrap();
        let deletes_after = engine.backend.calls().into_iter().filter(|(op, _, _)| op == "delete").count();
        assert_eq!(deletes_after, 1);
    }

    #[tokio::test]
    async fn front_positioned_entries_use_insert() {
        let engine = RuleEngine::with_backend(RecordingBackend::default());
        let entry = sample_entry().at_front();
        engine.add("policy-a", &entry).await.unwrap();

        let calls = engine.backend.calls();
        assert_eq!(calls[0].0, "insert");
    }
}

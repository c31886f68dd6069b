//! The in-memory Cache (§3, §5): namespace/pod/raw-policy/processed-policy maps
//! behind one writer lock (`tokio::sync::Mutex`), plus JSON snapshot persistence for
//! crash recovery (§4.5, §7) and the `/debug` introspection surface (§6).
//!
//! Watcher callbacks MUST NOT acquire [`Cache::lock`] — only a controller worker's
//! reconcile body may, and only for the duration of one reconciliation (§5
//! "Locking discipline").

mod diff;
mod error;
mod namespace;
mod pod;
mod policy;
mod snapshot;

pub use diff::label_diff;
pub use error::{Error, Result};
pub use namespace::{ALL_NAMESPACES_KEY, NamespaceEntry};
pub use pod::{NamedPort, PodEntry, PodPhase, PortProtocol, pod_key};
pub use policy::{RawPolicyEntry, raw_policy_key};
pub use snapshot::{DebugSnapshot, build as build_debug_snapshot};

use std::collections::BTreeMap;
use std::path::Path;

use kubenp_policy::ProcessedPolicy;
use tokio::sync::{Mutex, MutexGuard};

/// The four maps of §3 plus the two bootstrap/teardown flags of §4.4.3/§4.5,
/// serialized as a unit for `save`/`restore` (§7) and for the round-trip property of
/// §8 ("JSON encode of the cache followed by decode yields an equal cache").
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheInner {
    pub namespaces: BTreeMap<String, NamespaceEntry>,
    pub pods: BTreeMap<String, PodEntry>,
    pub raw_policies: BTreeMap<String, RawPolicyEntry>,
    pub processed: BTreeMap<String, ProcessedPolicy>,
    /// Whether RLE's top-level chain tree has been created (§4.4.3, §4.5).
    pub chain_initialized: bool,
    /// False only across the delete-then-add sequence of a policy update (§4.4.3,
    /// §7): guards the chain tree from being torn down mid-update.
    pub safe_to_clean: bool,
}

impl CacheInner {
    fn bootstrap() -> Self {
        Self {
            namespaces: BTreeMap::from([(
                ALL_NAMESPACES_KEY.to_string(),
                NamespaceEntry::new(ALL_NAMESPACES_KEY, BTreeMap::new(), None),
            )]),
            safe_to_clean: true,
            ..Default::default()
        }
    }

    /// Real, observed namespaces — excludes the synthetic all-namespaces bookkeeping
    /// entry inserted at bootstrap.
    pub fn real_namespaces(&self) -> impl Iterator<Item = &NamespaceEntry> {
        self.namespaces
            .iter()
            .filter(|(k, _)| k.as_str() != ALL_NAMESPACES_KEY)
            .map(|(_, v)| v)
    }

    /// Whether any policy remains installed anywhere on the node — RLE's top-level
    /// chain tree may only be torn down once this is false (§4.4.3).
    pub fn has_any_policy(&self) -> bool {
        !self.raw_policies.is_empty()
    }
}

pub struct Cache {
    inner: Mutex<CacheInner>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner::bootstrap()),
        }
    }

    /// Acquire the single writer lock. Holders may call IPSE/RLE while holding this
    /// guard (§5 "mutate cache and invoke engines"); they must not block on anything
    /// else (e.g. another reconciliation's queue item).
    pub async fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().await
    }

    pub async fn snapshot(&self) -> CacheInner {
        self.inner.lock().await.clone()
    }

    /// Persist the cache to `path` as JSON. Called by the periodic save task and
    /// once more during graceful shutdown (§4.5).
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let json = serde_json::to_vec_pretty(&snapshot).map_err(Error::Encode)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|err| Error::Io(path.to_path_buf(), err))?;
        Ok(())
    }

    /// Replace the cache wholesale from `path`. Only ever called once, at bootstrap,
    /// before any controller worker starts (§4.5, §7): a malformed snapshot here is
    /// fatal, matching the "malformed save-file restore is fatal" design note.
    pub async fn restore(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| Error::Io(path.to_path_buf(), err))?;
        let restored: CacheInner = serde_json::from_slice(&bytes).map_err(Error::Decode)?;
        *self.inner.lock().await = restored;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn bootstrap_seeds_the_all_namespaces_entity() {
        let cache = Cache::new();
        let snapshot = cache.snapshot().await;
        assert!(snapshot.namespaces.contains_key(ALL_NAMESPACES_KEY));
        assert_eq!(snapshot.real_namespaces().count(), 0);
        assert!(snapshot.safe_to_clean);
    }

    #[tokio::test]
    async fn save_then_restore_round_trips_the_cache() {
        let cache = Cache::new();
        {
            let mut guard = cache.lock().await;
            guard.namespaces.insert(
                "dev".to_string(),
                NamespaceEntry::new("dev", BTreeMap::from([("team".to_string(), "sre".to_string())]), Some(5)),
            );
            guard.chain_initialized = true;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        cache.save(&path).await.unwrap();

        let restored = Cache::new();
        restored.restore(&path).await.unwrap();
        assert_eq!(cache.snapshot().await, restored.snapshot().await);
    }

    #[tokio::test]
    async fn has_any_policy_reflects_the_raw_map() {
        let cache = Cache::new();
        assert!(!cache.snapshot().await.has_any_policy());
        {
            let mut guard = cache.lock().await;
            guard.raw_policies.insert(
                "dev/allow-web".to_string(),
                RawPolicyEntry::new(Some(1), kubenp_policy::CompiledPolicy::default()),
            );
        }
        assert!(cache.snapshot().await.has_any_policy());
    }
}

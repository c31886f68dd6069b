//! Startup sequence (§4.5): restore any persisted state, re-create the bookkeeping
//! IPSE needs regardless of a fresh or restored cache, and periodically snapshot
//! the cache to disk so a restart doesn't need to relist every Pod/Namespace in the
//! cluster to rebuild its membership view.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kubenp_ipset::SetKind;
use kubenp_keys::{all_namespaces_list, namespace_set_name};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};

use crate::context::Engines;
use crate::controllers::{namespace, networkpolicy, pod};
use crate::error::{Error, Result};

/// The three on-disk snapshot paths a process restores from / saves to (§4.5, §7).
pub struct SnapshotPaths {
    pub cache: PathBuf,
    pub ipset: PathBuf,
    pub ruleengine: PathBuf,
}

impl SnapshotPaths {
    pub fn under(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            cache: dir.join("cache.json"),
            ipset: dir.join("ipset.json"),
            ruleengine: dir.join("ruleengine.json"),
        }
    }
}

/// Restore persisted state if present, otherwise leave the freshly constructed
/// engines/cache as they are (§4.5 "Startup"). `ipset restore`/`iptables-restore`
/// only replay kernel-level state from the snapshot files; they carry no ownership
/// information, so IPSE/RLE's in-memory owner maps stay empty after this call.
/// Callers MUST follow this with [`replay_owner_maps`] before any controller worker
/// starts, or the first reconcile to observe an object that already matches the
/// restored cache will take the no-op diff branch and never populate the owner maps
/// that later `delete`/`delete_from_set`/`delete_from_list` calls depend on.
pub async fn restore_state(engines: &Engines, paths: &SnapshotPaths) -> Result<()> {
    if paths.cache.exists() {
        info!(msg = "restoring cache snapshot", path = %paths.cache.display());
        engines.cache.restore(&paths.cache).await?;
    } else {
        info!(msg = "no cache snapshot found, starting fresh");
    }
    if paths.ipset.exists() {
        info!(msg = "restoring ipset snapshot", path = %paths.ipset.display());
        engines
            .ipset
            .restore(&paths.ipset)
            .await
            .map_err(|err| Error::PermanentBackendError(err.to_string()))?;
    }
    if paths.ruleengine.exists() {
        info!(msg = "restoring ruleengine snapshot", path = %paths.ruleengine.display());
        engines
            .ruleengine
            .restore(&paths.ruleengine)
            .await
            .map_err(|err| Error::PermanentBackendError(err.to_string()))?;
    }
    Ok(())
}

/// Rebuild IPSE/RLE's in-memory owner maps from whatever [`restore_state`] just put
/// in the cache (§4.5, §7). `ipset restore`/`iptables-restore` already recreated the
/// matching kernel-level sets/lists/rules, and every `create_*`/`add_*` call here is
/// idempotent against kernel state that's already present (`-exist`, `append_unique`/
/// `insert_unique`), so this only populates the owner maps — it does not re-issue
/// redundant kernel mutations. Must run after `restore_state` and before any
/// controller worker starts.
pub async fn replay_owner_maps(engines: &Engines) -> Result<()> {
    let cache = engines.cache.snapshot().await;

    for ns_entry in cache.real_namespaces() {
        let ns_set = namespace_set_name(&ns_entry.name);
        engines.ipset.create_set(&ns_set, SetKind::NetHash).await?;
        engines.ipset.create_list(all_namespaces_list()).await?;
        engines.ipset.add_to_list(all_namespaces_list(), &ns_set).await?;
        namespace::add_label_memberships(&engines.ipset, &ns_set, &ns_entry.labels).await?;
    }

    for pod_entry in cache.pods.values() {
        pod::add_memberships(&engines.ipset, &pod_entry.key, &pod::all_memberships(pod_entry)).await?;
    }

    for raw_entry in cache.raw_policies.values() {
        networkpolicy::install_policy(&engines.ipset, &engines.ruleengine, &raw_entry.compiled).await?;
    }

    Ok(())
}

/// Ensure the synthetic all-namespaces list exists regardless of whether the cache
/// was restored or started fresh (§3 "all-namespaces bookkeeping entity"). The
/// well-known `kube-system` set is not special-cased here: it is just
/// `namespace_set_name("kube-system")` under a fixed alias, created the same way as
/// any other namespace set once NSC observes that `Namespace` object.
pub async fn ensure_all_namespaces_bookkeeping(engines: &Engines) -> Result<()> {
    engines.ipset.create_list(kubenp_keys::all_namespaces_list()).await?;
    Ok(())
}

/// Spawn the periodic cache-save task (§4.5 "periodic save, default ~60s").
pub fn spawn_periodic_save(engines: Arc<Engines>, path: PathBuf, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if let Err(err) = engines.cache.save(&path).await {
                error!(msg = "periodic cache save failed", %err);
            }
        }
    })
}

/// Final save performed during graceful shutdown, after the worker loops have been
/// asked to stop (§4.5 "drain in-flight items, final save").
pub async fn save_on_shutdown(engines: &Engines, paths: &SnapshotPaths) {
    if let Err(err) = engines.cache.save(&paths.cache).await {
        error!(msg = "final cache save failed", %err);
    }
    if let Err(err) = engines.ipset.save(&paths.ipset).await {
        error!(msg = "final ipset save failed", %err);
    }
    if let Err(err) = engines.ruleengine.save(&paths.ruleengine).await {
        error!(msg = "final ruleengine save failed", %err);
    }
}

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::kind::{SetKind, UNSPECIFIED_CIDR, UNSPECIFIED_CIDR_SPLIT};
use crate::runner::{CommandRunner, ProcessRunner};

/// An element held in a `hash:net`/`hash:ip,port` set, refcounted by owner key so
/// that two independent callers adding the same element don't step on each other's
/// `delete_from_set`.
#[derive(Debug, Default)]
struct SetRecord {
    kind: SetKind,
    owners: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Default)]
struct ListRecord {
    /// member set name -> refcount (number of distinct owners that added it)
    members: HashMap<String, u32>,
}

/// The Set Engine (IPSE): owner-refcounted mutations against named kernel sets and
/// lists, fronted by the `ipset` binary.
///
/// Every mutating call takes an `owner` key identifying the caller (typically a
/// policy or pod identity). The engine only issues a kernel command on the
/// transition edges — first owner in, last owner out — so repeated calls from
/// independent owners are safe and the in-memory map always mirrors the dataplane.
pub struct IpsetEngine<R: CommandRunner = ProcessRunner> {
    runner: R,
    sets: RwLock<HashMap<String, SetRecord>>,
    lists: RwLock<HashMap<String, ListRecord>>,
}

impl IpsetEngine<ProcessRunner> {
    pub fn new() -> Self {
        Self::with_runner(ProcessRunner::default())
    }
}

impl Default for IpsetEngine<ProcessRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> IpsetEngine<R> {
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            sets: RwLock::new(HashMap::new()),
            lists: RwLock::new(HashMap::new()),
        }
    }

    /// Create a named set if it does not already exist. Idempotent: calling this
    /// twice with the same name and kind is a no-op on the second call.
    #[instrument(skip(self))]
    pub async fn create_set(&self, name: &str, kind: SetKind) -> Result<()> {
        let mut sets = self.sets.write().await;
        if sets.contains_key(name) {
            return Ok(());
        }
        self.runner
            .run(&["create", name, kind.ipset_type(), "-exist"])
            .await?;
        sets.insert(
            name.to_string(),
            SetRecord {
                kind,
                owners: HashMap::new(),
            },
        );
        debug!(set = name, ?kind, "created set");
        Ok(())
    }

    /// Destroy a named set. Refuses if any owner still has elements registered.
    #[instrument(skip(self))]
    pub async fn destroy_set(&self, name: &str) -> Result<()> {
        let mut sets = self.sets.write().await;
        let Some(record) = sets.get(name) else {
            return Ok(());
        };
        if record.owners.values().any(|elems| !elems.is_empty()) {
            return Err(Error::InUse(name.to_string()));
        }
        self.runner.run(&["destroy", name]).await?;
        sets.remove(name);
        debug!(set = name, "destroyed set");
        Ok(())
    }

    /// Add an element to a set on behalf of `owner`. Splits `0.0.0.0/0` into its
    /// two half-range equivalents since `hash:net` rejects the unspecified CIDR
    /// directly.
    #[instrument(skip(self))]
    pub async fn add_to_set(&self, set: &str, owner: &str, element: &str) -> Result<()> {
        let elements = split_unspecified(element);
        let mut sets = self.sets.write().await;
        let record = sets.get_mut(set).ok_or_else(|| Error::Unknown(set.to_string()))?;

        for elem in &elements {
            let already_present = record
                .owners
                .values()
                .any(|owned| owned.contains(elem.as_str()));
            if !already_present {
                self.runner.run(&["add", set, elem, "-exist"]).await?;
            }
        }

        let owned = record.owners.entry(owner.to_string()).or_default();
        for elem in elements {
            owned.insert(elem);
        }
        Ok(())
    }

    /// Remove an element on behalf of `owner`. Only issues the kernel delete once no
    /// remaining owner still references the element; on kernel failure the map
    /// mutation is rolled back so it keeps mirroring the dataplane.
    #[instrument(skip(self))]
    pub async fn delete_from_set(&self, set: &str, owner: &str, element: &str) -> Result<()> {
        let elements = split_unspecified(element);
        let mut sets = self.sets.write().await;
        let record = sets.get_mut(set).ok_or_else(|| Error::Unknown(set.to_string()))?;

        let Some(owned) = record.owners.get_mut(owner) else {
            return Ok(());
        };
        let mut removed = Vec::new();
        for elem in &elements {
            if owned.remove(elem.as_str()) {
                removed.push(elem.clone());
            }
        }
        if owned.is_empty() {
            record.owners.remove(owner);
        }

        for elem in removed {
            let still_owned = record
                .owners
                .values()
                .any(|owned| owned.contains(elem.as_str()));
            if !still_owned {
                if let Err(err) = self.runner.run(&["del", set, &elem]).await {
                    // roll back: element is still in use from this owner's perspective
                    record
                        .owners
                        .entry(owner.to_string())
                        .or_default()
                        .insert(elem);
                    warn!(set, owner, %err, "ipset del failed, reverted owner map");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Create a `list:set` if absent.
    #[instrument(skip(self))]
    pub async fn create_list(&self, name: &str) -> Result<()> {
        let mut lists = self.lists.write().await;
        if lists.contains_key(name) {
            return Ok(());
        }
        self.runner
            .run(&["create", name, "list:set", "-exist"])
            .await?;
        lists.insert(name.to_string(), ListRecord::default());
        Ok(())
    }

    pub async fn destroy_list(&self, name: &str) -> Result<()> {
        let mut lists = self.lists.write().await;
        let Some(record) = lists.get(name) else {
            return Ok(());
        };
        if record.members.values().any(|&count| count > 0) {
            return Err(Error::InUse(name.to_string()));
        }
        self.runner.run(&["destroy", name]).await?;
        lists.remove(name);
        Ok(())
    }

    /// Add `member` set to `list`, refcounted across callers. The kernel `add` only
    /// runs on the 0->1 transition.
    #[instrument(skip(self))]
    pub async fn add_to_list(&self, list: &str, member: &str) -> Result<()> {
        let mut lists = self.lists.write().await;
        let record = lists
            .get_mut(list)
            .ok_or_else(|| Error::Unknown(list.to_string()))?;
        let count = record.members.entry(member.to_string()).or_insert(0);
        if *count == 0 {
            self.runner.run(&["add", list, member, "-exist"]).await?;
        }
        *count += 1;
        Ok(())
    }

    /// Remove `member` from `list`. The kernel `del` only runs on the 1->0
    /// transition; the refcount is restored if the kernel call fails.
    #[instrument(skip(self))]
    pub async fn delete_from_list(&self, list: &str, member: &str) -> Result<()> {
        let mut lists = self.lists.write().await;
        let record = lists
            .get_mut(list)
            .ok_or_else(|| Error::Unknown(list.to_string()))?;
        let Some(count) = record.members.get_mut(member) else {
            return Ok(());
        };
        if *count == 0 {
            return Ok(());
        }
        if *count == 1 {
            if let Err(err) = self.runner.run(&["del", list, member]).await {
                warn!(list, member, %err, "ipset del failed, kept member refcounted");
                return Err(err);
            }
            record.members.remove(member);
        } else {
            *count -= 1;
        }
        Ok(())
    }

    /// Snapshot the current dataplane to `path` via `ipset save`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        self.runner
            .run(&["save", "-file", path_str.as_str()])
            .await
            .map_err(|err| match err {
                Error::Backend(_, detail) => Error::Snapshot(path_str.clone(), std::io::Error::other(detail)),
                other => other,
            })?;
        Ok(())
    }

    /// Point-in-time view of every set's elements, for the `/debug` HTTP surface
    /// (§6). Element order is not meaningful; owners are collapsed away.
    pub async fn sets_snapshot(&self) -> HashMap<String, Vec<String>> {
        let sets = self.sets.read().await;
        sets.iter()
            .map(|(name, record)| {
                let mut elements: HashSet<&str> = HashSet::new();
                for owned in record.owners.values() {
                    elements.extend(owned.iter().map(String::as_str));
                }
                let mut elements: Vec<String> = elements.into_iter().map(str::to_string).collect();
                elements.sort_unstable();
                (name.clone(), elements)
            })
            .collect()
    }

    /// Point-in-time view of every list's members, for the `/debug` HTTP surface.
    pub async fn lists_snapshot(&self) -> HashMap<String, Vec<String>> {
        let lists = self.lists.read().await;
        lists
            .iter()
            .map(|(name, record)| {
                let mut members: Vec<String> = record.members.keys().cloned().collect();
                members.sort_unstable();
                (name.clone(), members)
            })
            .collect()
    }

    /// Restore the dataplane from `path` via `ipset restore`. Callers are expected
    /// to rebuild the in-memory owner maps separately by replaying the cache, since
    /// `ipset restore` does not report ownership.
    pub async fn restore(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy().into_owned();
        self.runner
            .run(&["restore", "-file", path_str.as_str(), "-exist"])
            .await
            .map_err(|err| match err {
                Error::Backend(_, detail) => Error::Snapshot(path_str.clone(), std::io::Error::other(detail)),
                other => other,
            })?;
        Ok(())
    }
}

fn split_unspecified(element: &str) -> Vec<String> {
    if element == UNSPECIFIED_CIDR {
        UNSPECIFIED_CIDR_SPLIT.iter().map(|s| s.to_string()).collect()
    } else {
        vec![element.to_string()]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<Vec<String>>>,
        fail_next: AtomicUsize,
    }

    impl RecordingRunner {
        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for RecordingRunner {
        async fn run(&self, args: &[&str]) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|s| s.to_string()).collect());
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Backend("boom".into(), "synthetic failure".into()));
            }
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn add_to_set_only_issues_kernel_add_once_per_element() {
        let engine = IpsetEngine::with_runner(RecordingRunner::default());
        engine.create_set("ns-a", SetKind::NetHash).await.unwrap();
        engine.add_to_set("ns-a", "owner-1", "10.0.0.1/32").await.unwrap();
        engine.add_to_set("ns-a", "owner-2", "10.0.0.1/32").await.unwrap();

        let add_calls = engine
            .runner
            .calls()
            .into_iter()
            .filter(|c| c[0] == "add")
            .count();
        assert_eq!(add_calls, 1);
    }

    #[tokio::test]
    async fn delete_from_set_only_issues_kernel_del_when_last_owner_leaves() {
        let engine = IpsetEngine::with_runner(RecordingRunner::default());
        engine.create_set("ns-a", SetKind::NetHash).await.unwrap();
        engine.add_to_set("ns-a", "owner-1", "10.0.0.1/32").await.unwrap();
        engine.add_to_set("ns-a", "owner-2", "10.0.0.1/32").await.unwrap();

        engine.delete_from_set("ns-a", "owner-1", "10.0.0.1/32").await.unwrap();
        let del_calls_before = engine.runner.calls().into_iter().filter(|c| c[0] == "del").count();
        assert_eq!(del_calls_before, 0);

        engine.delete_from_set("ns-a", "owner-2", "10.0.0.1/32").await.unwrap();
        let del_calls_after = engine.runner.calls().into_iter().filter(|c| c[0] == "del").count();
        assert_eq!(del_calls_after, 1);
    }

    #[tokio::test]
    async fn unspecified_cidr_is_split_into_two_half_ranges() {
        let engine = IpsetEngine::with_runner(RecordingRunner::default());
        engine.create_set("ns-a", SetKind::NetHash).await.unwrap();
        engine.add_to_set("ns-a", "owner-1", "0.0.0.0/0").await.unwrap();

        let added: Vec<String> = engine
            .runner
            .calls()
            .into_iter()
            .filter(|c| c[0] == "add")
            .map(|c| c[2].clone())
            .collect();
        assert_eq!(added, vec!["1.0.0.0/1", "128.0.0.0/1"]);
    }

    #[tokio::test]
    async fn destroy_set_refuses_while_owners_remain() {
        let engine = IpsetEngine::with_runner(RecordingRunner::default());
        engine.create_set("ns-a", SetKind::NetHash).await.unwrap();
        engine.add_to_set("ns-a", "owner-1", "10.0.0.1/32").await.unwrap();

        let err = engine.destroy_set("ns-a").await.unwrap_err();
        assert!(matches!(err, Error::InUse(_)));
    }

    #[tokio::test]
    async fn failed_kernel_delete_reverts_owner_map() {
        let runner = RecordingRunner::default();
        runner.fail_next.store(0, Ordering::SeqCst);
        let engine = IpsetEngine::with_runner(runner);
        engine.create_set("ns-a", SetKind::NetHash).await.unwrap();
        engine.add_to_set("ns-a", "owner-1", "10.0.0.1/32").await.unwrap();

        engine.runner.fail_next.store(1, Ordering::SeqCst);
        let err = engine
            .delete_from_set("ns-a", "owner-1", "10.0.0.1/32")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_, _)));

        // owner map should still hold the element, so a retry issues del again
        engine.runner.fail_next.store(0, Ordering::SeqCst);
        engine
            .delete_from_set("ns-a", "owner-1", "10.0.0.1/32")
            .await
            .unwrap();
        let del_calls = engine.runner.calls().into_iter().filter(|c| c[0] == "del").count();
        assert_eq!(del_calls, 2);
    }

    #[tokio::test]
    async fn list_membership_is_refcounted_across_owners() {
        let engine = IpsetEngine::with_runner(RecordingRunner::default());
        engine.create_list("kube-system-pods").await.unwrap();
        engine.add_to_list("kube-system-pods", "ns-kube-system").await.unwrap();
        engine.add_to_list("kube-system-pods", "ns-kube-system").await.unwrap();

        let add_calls = engine.runner.calls().into_iter().filter(|c| c[0] == "add").count();
        assert_eq!(add_calls, 1);

        engine.delete_from_list("kube-system-pods", "ns-kube-system").await.unwrap();
        let del_calls_before = engine.runner.calls().into_iter().filter(|c| c[0] == "del").count();
        assert_eq!(del_calls_before, 0);

        engine.delete_from_list("kube-system-pods", "ns-kube-system").await.unwrap();
        let del_calls_after = engine.runner.calls().into_iter().filter(|c| c[0] == "del").count();
        assert_eq!(del_calls_after, 1);
    }
}

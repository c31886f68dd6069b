//! Reconciliation context bundling the two backend engines, the cache, and the
//! event recorder every controller needs (§4.4). `State` is the process-wide handle
//! the HTTP surface also holds; `Context` is what each controller's reconcile
//! function is given.

use std::sync::Arc;

use kube::Client;
use kube::runtime::reflector::Store;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kubenp_cache::Cache;
use kubenp_ipset::IpsetEngine;
use kubenp_k8s_util::events::{Recorder, Reporter};
use kubenp_ruleengine::RuleEngine;

use crate::metrics::Metrics;

/// `namespace/name` key, used by NSC and NPC (§4.4 "Key choice").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// `namespace/name/uid` key, used by PODC (§4.4 "Key choice"): a pod's UID changing
/// under a stable name (delete-then-recreate) must not be mistaken for an update of
/// the same cluster-unique entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl std::fmt::Display for PodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.name, self.uid)
    }
}

/// The three backend handles every reconcile body mutates under the cache's single
/// writer lock (§5).
pub struct Engines {
    pub ipset: Arc<IpsetEngine>,
    pub ruleengine: Arc<RuleEngine>,
    pub cache: Arc<Cache>,
}

/// Process-wide state, cloned into the axum router and into each controller's
/// [`Context`].
#[derive(Clone)]
pub struct State {
    pub client: Client,
    pub engines: Arc<Engines>,
    pub metrics: Arc<Metrics>,
    pub node_name: String,
    pub pod_store: Store<Pod>,
    pub namespace_store: Store<Namespace>,
    pub networkpolicy_store: Store<NetworkPolicy>,
}

impl State {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Client,
        engines: Arc<Engines>,
        metrics: Arc<Metrics>,
        node_name: impl Into<String>,
        pod_store: Store<Pod>,
        namespace_store: Store<Namespace>,
        networkpolicy_store: Store<NetworkPolicy>,
    ) -> Self {
        Self {
            client,
            engines,
            metrics,
            node_name: node_name.into(),
            pod_store,
            namespace_store,
            networkpolicy_store,
        }
    }

    /// `hostname_override` replaces `Reporter`'s default `hostname::get()` lookup,
    /// e.g. when the node name known to Kubernetes differs from `gethostname(2)`.
    pub fn to_context(&self, controller_id: crate::metrics::ControllerId, hostname_override: Option<&str>) -> Arc<Context> {
        let mut reporter: Reporter = controller_id.into();
        if let Some(instance) = hostname_override {
            reporter.instance = Some(instance.to_string());
        }
        Arc::new(Context {
            client: self.client.clone(),
            engines: self.engines.clone(),
            metrics: self.metrics.controller(controller_id),
            node_name: self.node_name.clone(),
            recorder: Recorder::new(self.client.clone(), reporter),
            pod_store: self.pod_store.clone(),
            namespace_store: self.namespace_store.clone(),
            networkpolicy_store: self.networkpolicy_store.clone(),
        })
    }
}

/// Everything one controller's reconcile function needs to act (§4.4). Cloning a
/// `Context` is cheap: every field is an `Arc`/`Client`/`Store` handle.
pub struct Context {
    pub client: Client,
    pub engines: Arc<Engines>,
    pub metrics: Arc<crate::metrics::ControllerMetrics>,
    pub node_name: String,
    pub recorder: Recorder,
    pub pod_store: Store<Pod>,
    pub namespace_store: Store<Namespace>,
    pub networkpolicy_store: Store<NetworkPolicy>,
}

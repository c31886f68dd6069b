//! Watcher dispatch and worker loops for the three controllers (§4.4): each watcher
//! feeds a [`WorkQueue`] instead of `kube::runtime::Controller`'s built-in scheduler,
//! since this system's rate limiting and per-key redo-collapsing (§5) are bespoke.

pub mod namespace;
pub mod networkpolicy;
pub mod pod;

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::{Namespace, ObjectReference, Pod};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::ResourceExt;
use kube::api::Api;
use kube::runtime::reflector::store::Writer;
use kube::runtime::{WatchStreamExt, watcher};
use tracing::{error, trace, warn};

use crate::context::{Context, NamespacedName, PodKey};
use crate::error::Error;
use crate::queue::{BackoffTable, WorkQueue};
use kubenp_k8s_util::events::{Event, EventType};

pub fn watch_pods(api: Api<Pod>, writer: Writer<Pod>, ctx: Arc<Context>, queue: Arc<WorkQueue<PodKey>>) -> BoxFuture<'static, ()> {
    watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .for_each(move |res| {
            let ctx = ctx.clone();
            let queue = queue.clone();
            async move {
                match res {
                    Ok(watcher::Event::Apply(pod)) | Ok(watcher::Event::Delete(pod)) => {
                        let (Some(namespace), Some(uid)) = (pod.namespace(), pod.uid()) else {
                            return;
                        };
                        trace!(msg = "pod watch event", %namespace, name = %pod.name_any());
                        ctx.metrics.triggered_inc();
                        queue
                            .enqueue(PodKey {
                                namespace,
                                name: pod.name_any(),
                                uid,
                            })
                            .await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(msg = "pod watch stream error", %err);
                        ctx.metrics.watch_operations_failed_inc();
                    }
                }
            }
        })
        .boxed()
}

pub fn watch_namespaces(
    api: Api<Namespace>,
    writer: Writer<Namespace>,
    ctx: Arc<Context>,
    queue: Arc<WorkQueue<NamespacedName>>,
) -> BoxFuture<'static, ()> {
    watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .for_each(move |res| {
            let ctx = ctx.clone();
            let queue = queue.clone();
            async move {
                match res {
                    Ok(watcher::Event::Apply(ns)) | Ok(watcher::Event::Delete(ns)) => {
                        let name = ns.name_any();
                        trace!(msg = "namespace watch event", %name);
                        ctx.metrics.triggered_inc();
                        queue.enqueue(NamespacedName::new(String::new(), name)).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(msg = "namespace watch stream error", %err);
                        ctx.metrics.watch_operations_failed_inc();
                    }
                }
            }
        })
        .boxed()
}

pub fn watch_networkpolicies(
    api: Api<NetworkPolicy>,
    writer: Writer<NetworkPolicy>,
    ctx: Arc<Context>,
    queue: Arc<WorkQueue<NamespacedName>>,
) -> BoxFuture<'static, ()> {
    watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .for_each(move |res| {
            let ctx = ctx.clone();
            let queue = queue.clone();
            async move {
                match res {
                    Ok(watcher::Event::Apply(np)) | Ok(watcher::Event::Delete(np)) => {
                        let Some(namespace) = np.namespace() else {
                            return;
                        };
                        let name = np.name_any();
                        trace!(msg = "networkpolicy watch event", %namespace, %name);
                        ctx.metrics.triggered_inc();
                        queue.enqueue(NamespacedName::new(namespace, name)).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!(msg = "networkpolicy watch stream error", %err);
                        ctx.metrics.watch_operations_failed_inc();
                    }
                }
            }
        })
        .boxed()
}

fn error_event(err: &Error) -> Event {
    let (reason, type_) = match err {
        Error::TransientBackendError(_) => ("TransientBackendError", EventType::Warning),
        Error::InvalidObject(_) => ("InvalidObject", EventType::Warning),
        Error::InvariantViolation(_) => ("InvariantViolation", EventType::Warning),
        Error::PermanentBackendError(_) => ("PermanentBackendError", EventType::Warning),
        _ => ("ReconcileError", EventType::Warning),
    };
    Event {
        type_,
        reason: reason.to_string(),
        note: Some(err.to_string()),
        action: "Reconcile".to_string(),
        secondary: None,
    }
}

/// Run the pod controller: dequeue, reconcile, apply per-key backoff on transient
/// failure, loop forever (§4.4.1, §5, §7).
pub async fn run_pod_worker(ctx: Arc<Context>, queue: Arc<WorkQueue<PodKey>>, backoff: Arc<BackoffTable<PodKey>>) {
    loop {
        let key = queue.dequeue().await;
        ctx.metrics.queue_depth_set(queue.depth().await);
        let measurer = ctx.metrics.reconcile_count_and_measure();
        let result = pod::reconcile_pod(&ctx, &key).await;
        drop(measurer);
        handle_outcome(&ctx, &queue, &backoff, key, result, |key: &PodKey| ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            namespace: Some(key.namespace.clone()),
            name: Some(key.name.clone()),
            ..Default::default()
        })
        .await;
    }
}

pub async fn run_namespace_worker(ctx: Arc<Context>, queue: Arc<WorkQueue<NamespacedName>>, backoff: Arc<BackoffTable<NamespacedName>>) {
    loop {
        let key = queue.dequeue().await;
        ctx.metrics.queue_depth_set(queue.depth().await);
        let measurer = ctx.metrics.reconcile_count_and_measure();
        let result = namespace::reconcile_namespace(&ctx, &key).await;
        drop(measurer);
        handle_outcome(&ctx, &queue, &backoff, key, result, |key: &NamespacedName| ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Namespace".to_string()),
            name: Some(key.name.clone()),
            ..Default::default()
        })
        .await;
    }
}

pub async fn run_networkpolicy_worker(
    ctx: Arc<Context>,
    queue: Arc<WorkQueue<NamespacedName>>,
    backoff: Arc<BackoffTable<NamespacedName>>,
) {
    loop {
        let key = queue.dequeue().await;
        ctx.metrics.queue_depth_set(queue.depth().await);
        let measurer = ctx.metrics.reconcile_count_and_measure();
        let result = networkpolicy::reconcile_networkpolicy(&ctx, &key).await;
        drop(measurer);
        handle_outcome(&ctx, &queue, &backoff, key, result, |key: &NamespacedName| ObjectReference {
            api_version: Some("networking.k8s.io/v1".to_string()),
            kind: Some("NetworkPolicy".to_string()),
            namespace: Some(key.namespace.clone()),
            name: Some(key.name.clone()),
            ..Default::default()
        })
        .await;
    }
}

/// Shared post-reconcile bookkeeping: backoff reset/schedule, metrics, events,
/// `queue.finish` (§5, §7, §10.6).
async fn handle_outcome<Key>(
    ctx: &Arc<Context>,
    queue: &Arc<WorkQueue<Key>>,
    backoff: &Arc<BackoffTable<Key>>,
    key: Key,
    result: crate::error::Result<()>,
    to_reference: impl FnOnce(&Key) -> ObjectReference,
) where
    Key: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
{
    match result {
        Ok(()) => {
            backoff.reset(&key).await;
        }
        Err(err) => {
            warn!(msg = "reconcile failed", %err);
            ctx.metrics.reconcile_failure_inc();
            let reference = to_reference(&key);
            if let Err(publish_err) = ctx.recorder.publish(error_event(&err), &reference).await {
                error!(msg = "failed to publish event", %publish_err);
            }
            if err.is_transient() {
                let delay = backoff.next_delay(&key).await;
                queue.enqueue_after(key.clone(), delay);
            } else {
                ctx.metrics.reconcile_dropped_inc();
            }
        }
    }
    queue.finish(key).await;
}

//! Publishes Kubernetes `Events` for Pods/Namespaces/NetworkPolicies, for Kubernetes
//! >= 1.19 (`events.k8s.io/v1`). Used to surface `InvariantViolation` recovery and
//! sustained backend failures on `kubectl describe` of the offending object, mirroring
//! the visibility a CRD reconciler's status conditions would give.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use k8s_openapi::{
    api::{core::v1::ObjectReference, events::v1::Event as K8sEvent, events::v1::EventSeries},
    apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta},
    chrono::{Duration, Utc},
};
use kube::ResourceExt;
use kube::{
    Client,
    api::{Api, Patch, PatchParams, PostParams},
};
use tokio::sync::RwLock;

const EVENT_FINISH_TIME: Duration = Duration::minutes(6);

/// Minimal event description handed to [`Recorder::publish`]. All string fields must
/// be human readable.
pub struct Event {
    pub type_: EventType,
    /// PascalCase, e.g. `"TransientBackendError"`.
    pub reason: String,
    pub note: Option<String>,
    /// PascalCase, e.g. `"IpsetSync"`.
    pub action: String,
    pub secondary: Option<ObjectReference>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Clone, Debug, PartialEq)]
struct Reference(ObjectReference);

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.api_version.hash(state);
        self.0.kind.hash(state);
        self.0.name.hash(state);
        self.0.namespace.hash(state);
        self.0.uid.hash(state);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct EventKey {
    event_type: EventType,
    action: String,
    reason: String,
    reporting_controller: String,
    reporting_instance: Option<String>,
    regarding: Reference,
}

/// Identifies the controller publishing events, shown as `reportingComponent` /
/// `reportingInstance` on the `Event` object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reporter {
    pub controller: String,
    pub instance: Option<String>,
}

impl From<&str> for Reporter {
    fn from(controller: &str) -> Self {
        let instance = hostname::get().ok().and_then(|h| h.into_string().ok());
        Self {
            controller: controller.into(),
            instance,
        }
    }
}

/// Publishes Kubernetes `Events`, deduplicating repeats of the same
/// (type, action, reason, object) into an `EventSeries` count bump instead of a new
/// object, the way `kubectl describe` expects bursty controller chatter to look.
#[derive(Clone)]
pub struct Recorder {
    client: Client,
    reporter: Reporter,
    events_cache: Arc<RwLock<HashMap<EventKey, K8sEvent>>>,
}

impl Recorder {
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self {
            client,
            reporter,
            events_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn event_key(&self, ev: &Event, regarding: &ObjectReference) -> EventKey {
        EventKey {
            event_type: ev.type_,
            action: ev.action.clone(),
            reason: ev.reason.clone(),
            reporting_controller: self.reporter.controller.clone(),
            reporting_instance: self.reporter.instance.clone(),
            regarding: Reference(regarding.clone()),
        }
    }

    fn generate_event(&self, ev: &Event, reference: &ObjectReference) -> K8sEvent {
        let now = Utc::now();
        K8sEvent {
            action: Some(ev.action.clone()),
            reason: Some(ev.reason.clone()),
            event_time: Some(MicroTime(now)),
            regarding: Some(reference.clone()),
            note: ev.note.clone(),
            metadata: ObjectMeta {
                namespace: reference.namespace.clone(),
                name: Some(format!(
                    "{}.{}",
                    reference.name.as_ref().unwrap_or(&self.reporter.controller),
                    now.timestamp()
                )),
                ..Default::default()
            },
            reporting_controller: Some(self.reporter.controller.clone()),
            reporting_instance: Some(
                self.reporter
                    .instance
                    .clone()
                    .unwrap_or_else(|| self.reporter.controller.clone()),
            ),
            series: None,
            type_: match ev.type_ {
                EventType::Normal => Some("Normal".into()),
                EventType::Warning => Some("Warning".into()),
            },
            related: ev.secondary.clone(),
            ..Default::default()
        }
    }

    /// Publish (or bump the series count of) an event against `reference`. The
    /// object is created in `reference`'s namespace, falling back to `default` for
    /// cluster-scoped objects (none of PODC/NSC/NPC's targets are, in practice).
    pub async fn publish(&self, ev: Event, reference: &ObjectReference) -> Result<(), kube::Error> {
        let now = Utc::now();
        let key = self.event_key(&ev, reference);

        let event = match self.events_cache.read().await.get(&key) {
            Some(existing) => {
                let series = match &existing.series {
                    Some(series) => EventSeries {
                        count: series.count + 1,
                        last_observed_time: MicroTime(now),
                    },
                    None => EventSeries {
                        count: 2,
                        last_observed_time: MicroTime(now),
                    },
                };
                let mut event = existing.clone();
                event.series = Some(series);
                event
            }
            None => self.generate_event(&ev, reference),
        };

        let events: Api<K8sEvent> = Api::namespaced(
            self.client.clone(),
            reference.namespace.as_deref().unwrap_or("default"),
        );
        if event.series.is_some() {
            events
                .patch(&event.name_any(), &PatchParams::default(), &Patch::Merge(&event))
                .await?;
        } else {
            events.create(&PostParams::default(), &event).await?;
        }

        let mut cache = self.events_cache.write().await;
        cache.insert(key, event);
        cache.retain(|_, v| match (&v.series, &v.event_time) {
            (Some(series), _) => series.last_observed_time.0 >= now - EVENT_FINISH_TIME,
            (None, Some(event_time)) => event_time.0 >= now - EVENT_FINISH_TIME,
            (None, None) => true,
        });
        Ok(())
    }
}

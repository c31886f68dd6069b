//! Per-controller counters/gauges/histograms, built on an
//! `opentelemetry::metrics::Meter`, covering the three controllers this engine runs
//! (§4.4) plus the readiness gauge of §10.6.

use std::collections::HashMap;
use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use tokio::time::Instant;

pub type ControllerId = &'static str;

pub const POD_CONTROLLER: ControllerId = "pod";
pub const NAMESPACE_CONTROLLER: ControllerId = "namespace";
pub const NETWORKPOLICY_CONTROLLER: ControllerId = "networkpolicy";

#[derive(Clone)]
pub struct Metrics {
    pub controllers: HashMap<ControllerId, Arc<ControllerMetrics>>,
    /// Flips to `1` once bootstrap (§4.5) has completed informer sync and the
    /// initial all-namespaces list; not scoped per controller since readiness is a
    /// whole-process property.
    ready: Gauge<u64>,
}

impl Metrics {
    pub fn new(meter: &Meter, controller_names: &[ControllerId]) -> Self {
        let controllers = controller_names
            .iter()
            .map(|&id| (id, Arc::new(ControllerMetrics::new(id, meter))))
            .collect();
        let ready = meter
            .u64_gauge("npmd_ready")
            .with_description("1 once bootstrap has completed, 0 otherwise")
            .build();
        Self { controllers, ready }
    }

    pub fn ready_set(&self, ready: bool) {
        self.ready.record(ready as u64, &[]);
    }

    pub fn controller(&self, id: ControllerId) -> Arc<ControllerMetrics> {
        self.controllers
            .get(id)
            .unwrap_or_else(|| panic!("controller id {id} was not registered with Metrics::new"))
            .clone()
    }
}

#[derive(Clone)]
pub struct ControllerMetrics {
    controller: String,
    triggered: Counter<u64>,
    watch_operations_failed: Counter<u64>,
    queue_depth: Gauge<i64>,
    pub reconcile: ReconcileMetrics,
}

impl ControllerMetrics {
    pub fn new(controller: &str, meter: &Meter) -> Self {
        let triggered = meter
            .u64_counter("triggered")
            .with_description("Number of watch events that resulted in an enqueue")
            .build();
        let watch_operations_failed = meter
            .u64_counter("watch_operations_failed")
            .with_description("Total number of watch stream errors")
            .build();
        let queue_depth = meter
            .i64_gauge("queue_depth")
            .with_description("Number of keys currently queued or in flight")
            .build();
        Self {
            controller: controller.to_string(),
            triggered,
            watch_operations_failed,
            queue_depth,
            reconcile: ReconcileMetrics::new(meter),
        }
    }

    pub fn triggered_inc(&self) {
        self.triggered.add(1, &[KeyValue::new("controller", self.controller.clone())]);
    }

    pub fn watch_operations_failed_inc(&self) {
        self.watch_operations_failed
            .add(1, &[KeyValue::new("controller", self.controller.clone())]);
    }

    pub fn queue_depth_set(&self, depth: i64) {
        self.queue_depth
            .record(depth, &[KeyValue::new("controller", self.controller.clone())]);
    }

    pub fn reconcile_failure_inc(&self) {
        self.reconcile
            .failures
            .add(1, &[KeyValue::new("controller", self.controller.clone())]);
    }

    pub fn reconcile_dropped_inc(&self) {
        self.reconcile
            .dropped
            .add(1, &[KeyValue::new("controller", self.controller.clone())]);
    }

    pub fn reconcile_count_and_measure(&self) -> ReconcileMeasurer {
        self.reconcile
            .operations
            .add(1, &[KeyValue::new("controller", self.controller.clone())]);
        ReconcileMeasurer {
            start: Instant::now(),
            controller: self.controller.clone(),
            metric: self.reconcile.duration.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub operations: Counter<u64>,
    pub failures: Counter<u64>,
    pub dropped: Counter<u64>,
    pub duration: Histogram<f64>,
}

impl ReconcileMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            operations: meter.u64_counter("reconcile_operations").build(),
            failures: meter.u64_counter("reconcile_failures").build(),
            dropped: meter.u64_counter("reconcile_dropped").build(),
            duration: meter
                .f64_histogram("reconcile_duration_seconds")
                .with_description("Reconcile duration in seconds")
                .build(),
        }
    }
}

/// Stop-the-clock guard returned by [`ControllerMetrics::reconcile_count_and_measure`];
/// records the elapsed duration when dropped.
pub struct ReconcileMeasurer {
    start: Instant,
    controller: String,
    metric: Histogram<f64>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        self.metric.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("controller", self.controller.clone())],
        );
    }
}

//! Prometheus metrics exported at `GET /metrics`.
//!
//! Gauges mirror the current cluster state and are refreshed from
//! `MasterService::cluster_status`; counters are bumped where the event happens.

use std::sync::Arc;

use common::{ClusterStatus, NodeHealth};
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::error;

type Labelled<M> = Family<[(String, String); 1], M>;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    pub nodes: Labelled<Gauge>, // label: health
    pub capacity_bytes: Gauge,
    pub free_bytes: Gauge,
    pub files: Gauge,
    pub chunks: Gauge,
    pub pending_rebalances: Gauge,
    pub unrecoverable_chunks: Gauge,

    pub rebalances_emitted: Counter,
    pub rebalances_completed: Counter,
    pub rebalances_expired: Counter,
    pub health_transitions: Labelled<Counter>, // label: to
    pub upload_plans: Labelled<Counter>,       // label: outcome
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let nodes = Labelled::<Gauge>::default();
        registry.register("chunkvault_nodes", "Registered storage nodes by health", nodes.clone());

        let capacity_bytes = Gauge::default();
        registry.register(
            "chunkvault_capacity_bytes",
            "Total capacity of non-removed nodes",
            capacity_bytes.clone(),
        );

        let free_bytes = Gauge::default();
        registry.register(
            "chunkvault_free_bytes",
            "Free bytes across non-removed nodes",
            free_bytes.clone(),
        );

        let files = Gauge::default();
        registry.register("chunkvault_files", "Files known to the master", files.clone());

        let chunks = Gauge::default();
        registry.register("chunkvault_chunks", "Chunks known to the master", chunks.clone());

        let pending_rebalances = Gauge::default();
        registry.register(
            "chunkvault_pending_rebalances",
            "Copy instructions waiting for completion",
            pending_rebalances.clone(),
        );

        let unrecoverable_chunks = Gauge::default();
        registry.register(
            "chunkvault_unrecoverable_chunks",
            "Chunks with no healthy replica as of the last sweep",
            unrecoverable_chunks.clone(),
        );

        let rebalances_emitted = Counter::default();
        registry.register(
            "chunkvault_rebalances_emitted",
            "Copy instructions issued by the replication sweep",
            rebalances_emitted.clone(),
        );

        let rebalances_completed = Counter::default();
        registry.register(
            "chunkvault_rebalances_completed",
            "Copy instructions confirmed by a chunk report or found done by a sweep",
            rebalances_completed.clone(),
        );

        let rebalances_expired = Counter::default();
        registry.register(
            "chunkvault_rebalances_expired",
            "Copy instructions dropped before completion",
            rebalances_expired.clone(),
        );

        let health_transitions = Labelled::<Counter>::default();
        registry.register(
            "chunkvault_node_health_transitions",
            "Node health changes by resulting state",
            health_transitions.clone(),
        );

        let upload_plans = Labelled::<Counter>::default();
        registry.register(
            "chunkvault_upload_plans",
            "Upload plan requests by outcome",
            upload_plans.clone(),
        );

        Self {
            registry: Arc::new(registry),
            nodes,
            capacity_bytes,
            free_bytes,
            files,
            chunks,
            pending_rebalances,
            unrecoverable_chunks,
            rebalances_emitted,
            rebalances_completed,
            rebalances_expired,
            health_transitions,
            upload_plans,
        }
    }

    pub fn record_transition(&self, to: NodeHealth, count: usize) {
        if count == 0 {
            return;
        }
        self.health_transitions
            .get_or_create(&[("to".to_string(), to.as_str().to_string())])
            .inc_by(count as u64);
    }

    pub fn record_upload_plan(&self, outcome: &str) {
        self.upload_plans
            .get_or_create(&[("outcome".to_string(), outcome.to_string())])
            .inc();
    }

    pub fn observe_status(&self, status: &ClusterStatus) {
        for (health, count) in [
            (NodeHealth::Healthy, status.healthy_nodes),
            (NodeHealth::Unhealthy, status.unhealthy_nodes),
            (NodeHealth::Removed, status.removed_nodes),
        ] {
            self.nodes
                .get_or_create(&[("health".to_string(), health.as_str().to_string())])
                .set(count as i64);
        }
        self.capacity_bytes.set(saturating_i64(status.capacity_bytes));
        self.free_bytes.set(saturating_i64(status.free_bytes));
        self.files.set(status.files as i64);
        self.chunks.set(status.chunks as i64);
        self.pending_rebalances.set(status.pending_rebalances as i64);
        self.unrecoverable_chunks.set(status.unrecoverable_chunks as i64);
    }

    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(err) = encode(&mut buffer, &self.registry) {
            error!(error = %err, "failed to encode metrics");
        }
        buffer
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

//! Observability infrastructure for the provisioner
//!
//! Provides:
//! - Prometheus metrics (cycle latency, scale-up outcomes, catalog size)
//! - Structured JSON logging with tracing

use crate::models::PriceModel;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static GLOBAL_METRICS: OnceLock<ProvisionerMetricsInner> = OnceLock::new();

struct ProvisionerMetricsInner {
    cycle_latency_seconds: Histogram,
    cycles_total: IntCounter,
    cycles_skipped: IntCounter,
    scale_up_requests: IntCounterVec,
    scale_up_failures: IntCounterVec,
    budget_exhausted: IntCounter,
    nodes_reclaimed: IntCounter,
    placement_failures: IntCounter,
    pending_workloads: IntGauge,
    cluster_nodes: IntGauge,
    catalog_offerings: IntGauge,
    catalog_generation: IntGauge,
}

impl ProvisionerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "compute_provisioner_cycle_latency_seconds",
                "Time spent in one autoscale cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            cycles_total: register_int_counter!(
                "compute_provisioner_cycles_total",
                "Autoscale cycles completed"
            )
            .expect("Failed to register cycles_total"),

            cycles_skipped: register_int_counter!(
                "compute_provisioner_cycles_skipped_total",
                "Autoscale cycles skipped because one was already running"
            )
            .expect("Failed to register cycles_skipped"),

            scale_up_requests: register_int_counter_vec!(
                "compute_provisioner_scale_up_requests_total",
                "Scale-up calls issued, by price model",
                &["price_model"]
            )
            .expect("Failed to register scale_up_requests"),

            scale_up_failures: register_int_counter_vec!(
                "compute_provisioner_scale_up_failures_total",
                "Scale-up calls that failed, by price model",
                &["price_model"]
            )
            .expect("Failed to register scale_up_failures"),

            budget_exhausted: register_int_counter!(
                "compute_provisioner_budget_exhausted_total",
                "Runs failed after exhausting their scale-up budget"
            )
            .expect("Failed to register budget_exhausted"),

            nodes_reclaimed: register_int_counter!(
                "compute_provisioner_nodes_reclaimed_total",
                "Nodes released because their run finished"
            )
            .expect("Failed to register nodes_reclaimed"),

            placement_failures: register_int_counter!(
                "compute_provisioner_placement_failures_total",
                "Placements that could not be built or submitted"
            )
            .expect("Failed to register placement_failures"),

            pending_workloads: register_int_gauge!(
                "compute_provisioner_pending_workloads",
                "Workloads waiting for a node in the last cycle"
            )
            .expect("Failed to register pending_workloads"),

            cluster_nodes: register_int_gauge!(
                "compute_provisioner_cluster_nodes",
                "Platform nodes seen in the last cycle"
            )
            .expect("Failed to register cluster_nodes"),

            catalog_offerings: register_int_gauge!(
                "compute_provisioner_catalog_offerings",
                "Offerings in the current instance catalog"
            )
            .expect("Failed to register catalog_offerings"),

            catalog_generation: register_int_gauge!(
                "compute_provisioner_catalog_generation",
                "Generation of the current instance catalog"
            )
            .expect("Failed to register catalog_generation"),
        }
    }
}

/// Provisioner metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct ProvisionerMetrics {
    _private: (),
}

impl Default for ProvisionerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ProvisionerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ProvisionerMetricsInner {
        GLOBAL_METRICS.get_or_init(ProvisionerMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
        self.inner().cycles_total.inc();
    }

    pub fn inc_cycles_skipped(&self) {
        self.inner().cycles_skipped.inc();
    }

    pub fn inc_scale_up_requests(&self, price_model: PriceModel) {
        self.inner()
            .scale_up_requests
            .with_label_values(&[price_model.as_str()])
            .inc();
    }

    pub fn inc_scale_up_failures(&self, price_model: PriceModel) {
        self.inner()
            .scale_up_failures
            .with_label_values(&[price_model.as_str()])
            .inc();
    }

    pub fn inc_budget_exhausted(&self) {
        self.inner().budget_exhausted.inc();
    }

    pub fn inc_nodes_reclaimed(&self) {
        self.inner().nodes_reclaimed.inc();
    }

    pub fn inc_placement_failures(&self) {
        self.inner().placement_failures.inc();
    }

    pub fn set_pending_workloads(&self, count: i64) {
        self.inner().pending_workloads.set(count);
    }

    pub fn set_cluster_nodes(&self, count: i64) {
        self.inner().cluster_nodes.set(count);
    }

    /// Update catalog size and generation
    pub fn set_catalog(&self, offerings: i64, generation: u64) {
        self.inner().catalog_offerings.set(offerings);
        self.inner()
            .catalog_generation
            .set(i64::try_from(generation).unwrap_or(i64::MAX));
    }
}

/// Structured logger for provisioning events
///
/// Keeps the `event` field consistent so log pipelines can key on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_scale_up_requested(
        &self,
        run_id: &str,
        instance_type: &str,
        price_model: PriceModel,
        total_attempts: u32,
        spot_attempts: u32,
    ) {
        info!(
            event = "scale_up_requested",
            instance = %self.instance,
            run_id = %run_id,
            instance_type = %instance_type,
            price_model = %price_model,
            total_attempts = total_attempts,
            spot_attempts = spot_attempts,
            "Requesting node"
        );
    }

    pub fn log_scale_up_failed(
        &self,
        run_id: &str,
        price_model: PriceModel,
        total_attempts: u32,
        spot_attempts: u32,
        error: &str,
    ) {
        warn!(
            event = "scale_up_failed",
            instance = %self.instance,
            run_id = %run_id,
            price_model = %price_model,
            total_attempts = total_attempts,
            spot_attempts = spot_attempts,
            error = %error,
            "Node request failed"
        );
    }

    /// Spot budget used up; further attempts go on-demand
    pub fn log_spot_escalation(&self, run_id: &str, spot_attempts: u32) {
        info!(
            event = "spot_escalation",
            instance = %self.instance,
            run_id = %run_id,
            spot_attempts = spot_attempts,
            "Escalating to on-demand capacity"
        );
    }

    /// Fallback price model is outside the resolved allow-list
    pub fn log_price_type_denied(&self, run_id: &str, price_model: PriceModel) {
        warn!(
            event = "price_type_denied",
            instance = %self.instance,
            run_id = %run_id,
            price_model = %price_model,
            "Price type not allowed by policy; requesting it anyway"
        );
    }

    pub fn log_budget_exhausted(&self, run_id: &str, total_attempts: u32) {
        warn!(
            event = "budget_exhausted",
            instance = %self.instance,
            run_id = %run_id,
            total_attempts = total_attempts,
            "Run failed: no capacity after all attempts"
        );
    }

    pub fn log_instance_substituted(&self, run_id: &str, requested: &str, substitute: &str, reason: &str) {
        info!(
            event = "instance_substituted",
            instance = %self.instance,
            run_id = %run_id,
            requested = %requested,
            substitute = %substitute,
            reason = %reason,
            "Using default instance type"
        );
    }

    pub fn log_placement_submitted(&self, run_id: &str, pod_name: &str, namespace: &str) {
        info!(
            event = "placement_submitted",
            instance = %self.instance,
            run_id = %run_id,
            pod_name = %pod_name,
            namespace = %namespace,
            "Placement submitted"
        );
    }

    pub fn log_node_reclaimed(&self, run_id: &str, node: &str) {
        info!(
            event = "node_reclaimed",
            instance = %self.instance,
            run_id = %run_id,
            node = %node,
            "Released node of finished run"
        );
    }

    pub fn log_catalog_refreshed(&self, generation: u64, offerings: usize, fingerprint: &str) {
        info!(
            event = "catalog_refreshed",
            instance = %self.instance,
            generation = generation,
            offerings = offerings,
            fingerprint = %fingerprint,
            "Instance catalog loaded"
        );
    }

    pub fn log_startup(&self, version: &str, default_region: &str) {
        info!(
            event = "provisioner_started",
            instance = %self.instance,
            version = %version,
            default_region = %default_region,
            "Compute provisioner started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "provisioner_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Compute provisioner shutting down"
        );
    }
}

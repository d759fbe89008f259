//! Autoscale control loop
//!
//! Each cycle finds runs whose pods cannot be scheduled for lack of
//! capacity, asks the node provisioner for a node per run and, once a node
//! is granted, submits the run's placement. Failed requests are retried on
//! later cycles, moving from spot to on-demand capacity once the spot budget
//! is spent, until the overall budget is exhausted and the run is failed.

use super::pending::pending_workloads;
use super::provider::{AttemptStore, ClusterClient, NodeProvisioner, RunStore};
use crate::catalog::{CatalogResolver, ResolverView};
use crate::error::{ProvisionError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{labels, InstanceSpec, PendingWorkload, PriceModel, RunRecord};
use crate::observability::{ProvisionerMetrics, StructuredLogger};
use crate::placement::{PlacementBuilder, PlacementRequest};
use dashmap::DashSet;
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Failure reason recorded on runs that never got a node
pub const CAPACITY_UNAVAILABLE: &str = "capacity unavailable";

/// Autoscaling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    /// Retries after the first failed scale-up before the run is failed
    pub max_node_up_retries: u32,
    /// Failed spot requests before falling back to on-demand
    pub max_spot_attempts: u32,
    pub spot_enabled: bool,
    pub max_cluster_size: usize,
    /// Scale-up calls in flight at once
    pub worker_threads: usize,
    /// Substitute for types missing from the catalog or denied by policy
    pub default_instance_type: String,
    pub node_label_selector: String,
    pub pod_label_selector: String,
    /// Release nodes of runs that have finished
    pub reclaim_enabled: bool,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            max_node_up_retries: 3,
            max_spot_attempts: 1,
            spot_enabled: true,
            max_cluster_size: 40,
            worker_threads: 4,
            default_instance_type: "m5.large".to_string(),
            node_label_selector: labels::NODE_SELECTOR.to_string(),
            pod_label_selector: labels::RUN_ID.to_string(),
            reclaim_enabled: true,
        }
    }
}

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// False when another cycle was already running
    pub ran: bool,
    pub nodes: usize,
    pub candidates: usize,
    pub scaled: usize,
    pub inherited: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub reclaimed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleReport {
    pub fn skipped() -> Self {
        Self::default()
    }

    fn record(&mut self, outcome: WorkloadOutcome) {
        match outcome {
            WorkloadOutcome::Scaled => self.scaled += 1,
            WorkloadOutcome::Retried => self.retried += 1,
            WorkloadOutcome::Failed => self.failed += 1,
            WorkloadOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// What happened to one workload in a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkloadOutcome {
    /// Node granted; placement submitted or left for the next cycle
    Scaled,
    /// Scale-up failed within budget
    Retried,
    /// Budget exhausted; run failed
    Failed,
    Skipped,
}

/// State shared with the per-workload tasks of a cycle
struct Shared {
    config: AutoscaleConfig,
    resolver: Arc<CatalogResolver>,
    builder: PlacementBuilder,
    cluster: Arc<dyn ClusterClient>,
    provisioner: Arc<dyn NodeProvisioner>,
    runs: Arc<dyn RunStore>,
    attempts: Arc<dyn AttemptStore>,
    /// Runs failed for lack of capacity while their pods stay pending
    exhausted: DashSet<String>,
    metrics: ProvisionerMetrics,
    logger: StructuredLogger,
}

pub struct AutoscaleCoordinator {
    shared: Arc<Shared>,
    cycle_lock: Mutex<()>,
    health: Option<HealthRegistry>,
}

impl AutoscaleCoordinator {
    pub fn builder() -> AutoscaleCoordinatorBuilder {
        AutoscaleCoordinatorBuilder::new()
    }

    pub fn config(&self) -> &AutoscaleConfig {
        &self.shared.config
    }

    pub fn resolver(&self) -> &Arc<CatalogResolver> {
        &self.shared.resolver
    }

    pub fn runs(&self) -> &Arc<dyn RunStore> {
        &self.shared.runs
    }

    pub fn attempts(&self) -> &Arc<dyn AttemptStore> {
        &self.shared.attempts
    }

    /// Runs failed for lack of capacity, sorted
    pub fn exhausted_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shared
            .exhausted
            .iter()
            .map(|id| id.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Run one cycle unless one is already in progress
    pub async fn run_cycle(&self) -> CycleReport {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Autoscale cycle already running, skipping");
            self.shared.metrics.inc_cycles_skipped();
            return CycleReport::skipped();
        };

        let start = Instant::now();
        let report = self.shared.clone().cycle().await;
        let elapsed = start.elapsed();
        self.shared.metrics.observe_cycle_latency(elapsed.as_secs_f64());

        debug!(
            elapsed_ms = elapsed.as_millis(),
            candidates = report.candidates,
            scaled = report.scaled,
            retried = report.retried,
            failed = report.failed,
            deferred = report.deferred,
            "Autoscale cycle complete"
        );
        report
    }

    /// Tick until shutdown
    pub async fn run(self: Arc<Self>, every: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = every.as_secs(), "Starting autoscale loop");

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let report = self.run_cycle().await;
                    self.report_health(&report, start.elapsed() > every).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down autoscale loop");
                    break;
                }
            }
        }
    }

    async fn report_health(&self, report: &CycleReport, overran: bool) {
        let Some(health) = &self.health else {
            return;
        };
        if !report.ran {
            return;
        }

        match &report.error {
            Some(message) => health.set_unhealthy(components::CLUSTER, message.clone()).await,
            None => health.set_healthy(components::CLUSTER).await,
        }
        if overran {
            health
                .set_degraded(components::COORDINATOR, "Cycle overran its interval")
                .await;
        } else {
            health.set_healthy(components::COORDINATOR).await;
        }
    }
}

impl Shared {
    async fn cycle(self: Arc<Self>) -> CycleReport {
        let mut report = CycleReport {
            ran: true,
            ..Default::default()
        };
        let view = Arc::new(self.resolver.view());

        let nodes = match self.cluster.list_nodes(&self.config.node_label_selector).await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "Failed to list cluster nodes");
                report.error = Some(e.to_string());
                return report;
            }
        };
        report.nodes = nodes.len();
        self.metrics.set_cluster_nodes(nodes.len() as i64);

        let runs_with_nodes: HashSet<String> = nodes
            .iter()
            .filter_map(|n| n.run_id().map(str::to_string))
            .collect();
        let slots = self.config.max_cluster_size.saturating_sub(nodes.len());

        if self.config.reclaim_enabled {
            for node in &nodes {
                if let Some(run_id) = node.run_id() {
                    if self.reclaim(run_id, &node.name).await {
                        report.reclaimed += 1;
                    }
                }
            }
        }

        let pods = match self
            .cluster
            .list_unschedulable_pods(&self.config.pod_label_selector)
            .await
        {
            Ok(pods) => pods,
            Err(e) => {
                error!(error = %e, "Failed to list unschedulable pods");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let pending = pending_workloads(&pods, &runs_with_nodes);
        self.metrics.set_pending_workloads(pending.len() as i64);

        let pending_ids: HashSet<String> = pending.iter().map(|w| w.run_id.clone()).collect();
        self.attempts.retain(&pending_ids).await;
        self.exhausted.retain(|id| pending_ids.contains(id));

        let mut candidates = Vec::with_capacity(pending.len());
        for workload in pending {
            if self.exhausted.contains(&workload.run_id) {
                continue;
            }
            report.candidates += 1;
            // children of runs with a node need no capacity
            if self.inherits_node(&workload.run_id, &runs_with_nodes).await {
                report.inherited += 1;
                continue;
            }
            candidates.push(workload);
        }

        if candidates.len() > slots {
            report.deferred = candidates.len() - slots;
            if slots == 0 {
                info!(
                    nodes = report.nodes,
                    max = self.config.max_cluster_size,
                    "Cluster at capacity, deferring scale-up"
                );
            }
            candidates.truncate(slots);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.worker_threads.max(1)));
        let mut tasks = JoinSet::new();
        for workload in candidates {
            let shared = self.clone();
            let view = view.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                shared.process(&view, &workload).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    error!(error = %e, "Workload task panicked");
                    report.skipped += 1;
                }
            }
        }

        report
    }

    /// Release the node of a finished run; true if released
    async fn reclaim(&self, run_id: &str, node_name: &str) -> bool {
        let run = match self.runs.load_run(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => return false,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to load run for reclamation");
                return false;
            }
        };
        if !run.status.is_terminal() {
            return false;
        }

        match self.provisioner.scale_down_node(run_id).await {
            Ok(()) => {
                self.metrics.inc_nodes_reclaimed();
                self.logger.log_node_reclaimed(run_id, node_name);
                true
            }
            Err(e) => {
                warn!(run_id = %run_id, node = %node_name, error = %e, "Failed to release node");
                false
            }
        }
    }

    /// Whether the run's parent already owns a node
    async fn inherits_node(&self, run_id: &str, runs_with_nodes: &HashSet<String>) -> bool {
        if runs_with_nodes.is_empty() {
            return false;
        }
        let parent = match self.runs.load_run(run_id).await {
            Ok(Some(run)) => run.parent_id,
            Ok(None) => None,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to load run");
                None
            }
        };
        match parent {
            Some(parent) if runs_with_nodes.contains(&parent) => {
                debug!(run_id = %run_id, parent_id = %parent, "Run inherits parent node");
                true
            }
            _ => false,
        }
    }

    async fn process(&self, view: &ResolverView, workload: &PendingWorkload) -> WorkloadOutcome {
        let run_id = workload.run_id.as_str();

        let run = match self.runs.load_run(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                debug!(run_id = %run_id, pod = %workload.pod_name, "No run record for pending pod");
                return WorkloadOutcome::Skipped;
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to load run");
                return WorkloadOutcome::Skipped;
            }
        };
        if run.status.is_terminal() {
            debug!(run_id = %run_id, status = ?run.status, "Run already finished");
            return WorkloadOutcome::Skipped;
        }

        let instance_type = match self.resolve_instance(view, &run) {
            Ok(instance_type) => instance_type,
            Err(e) => {
                error!(run_id = %run_id, error = %e, kind = e.kind(), "Skipping run");
                return WorkloadOutcome::Skipped;
            }
        };

        let state = self.attempts.get(run_id).await;
        let choice = choose_price_model(&self.config, view, &run, state.spot_attempts);
        let price_model = choice.model;
        if !choice.admitted {
            self.logger.log_price_type_denied(run_id, price_model);
        }
        if run.instance.spot && price_model == PriceModel::OnDemand && state.spot_attempts > 0 {
            self.logger.log_spot_escalation(run_id, state.spot_attempts);
        }

        // no node is requested for a pod that could never be placed
        let Some(pod) = self.build_placement(view, &run, &instance_type, price_model) else {
            return WorkloadOutcome::Skipped;
        };

        let region = view.resolve_region(run.instance.region_id.as_deref()).to_string();
        let spec = InstanceSpec {
            run_id: run.id.clone(),
            instance_type: instance_type.clone(),
            disk_gb: run.instance.disk_gb,
            region,
            price_model,
            parent_id: run.parent_id.clone(),
        };

        self.metrics.inc_scale_up_requests(price_model);
        self.logger.log_scale_up_requested(
            run_id,
            &instance_type,
            price_model,
            state.total_attempts,
            state.spot_attempts,
        );

        match self.provisioner.scale_up_node(&spec).await {
            Ok(()) => {
                self.attempts.clear(run_id).await;
                self.submit(run_id, pod).await;
                WorkloadOutcome::Scaled
            }
            Err(e) => self.handle_failure(run_id, price_model, &e).await,
        }
    }

    /// Requested type if admitted, else the configured default
    fn resolve_instance(&self, view: &ResolverView, run: &RunRecord) -> Result<String> {
        let region = run.instance.region_id.as_deref();
        let requested = &run.instance.node_type;

        match view.check_instance(requested, region, run.tool_id.as_deref()) {
            Ok(()) => Ok(requested.clone()),
            Err(reason) => {
                let default = &self.config.default_instance_type;
                if !view.catalog().contains(view.resolve_region(region), default) {
                    return Err(ProvisionError::ConfigurationFatal(format!(
                        "default instance type '{}' is not offered in region '{}' ({})",
                        default,
                        view.resolve_region(region),
                        reason
                    )));
                }
                self.logger
                    .log_instance_substituted(&run.id, requested, default, reason.kind());
                Ok(default.clone())
            }
        }
    }

    async fn handle_failure(
        &self,
        run_id: &str,
        price_model: PriceModel,
        error: &ProvisionError,
    ) -> WorkloadOutcome {
        let state = self
            .attempts
            .record_failure(run_id, price_model == PriceModel::Spot)
            .await;
        self.metrics.inc_scale_up_failures(price_model);
        self.logger.log_scale_up_failed(
            run_id,
            price_model,
            state.total_attempts,
            state.spot_attempts,
            &error.to_string(),
        );

        if state.total_attempts <= self.config.max_node_up_retries {
            return WorkloadOutcome::Retried;
        }

        let exhausted = ProvisionError::BudgetExhausted {
            run_id: run_id.to_string(),
            total_attempts: state.total_attempts,
        };
        let reason = format!("{}: {}", CAPACITY_UNAVAILABLE, exhausted);
        if let Err(e) = self.runs.mark_failed(run_id, &reason).await {
            error!(run_id = %run_id, error = %e, "Failed to mark run failed");
        }
        self.attempts.clear(run_id).await;
        self.exhausted.insert(run_id.to_string());
        self.metrics.inc_budget_exhausted();
        self.logger.log_budget_exhausted(run_id, state.total_attempts);
        WorkloadOutcome::Failed
    }

    /// Pod for the run, or None when it cannot be built
    fn build_placement(
        &self,
        view: &ResolverView,
        run: &RunRecord,
        instance_type: &str,
        price_model: PriceModel,
    ) -> Option<Pod> {
        let Some(offering) =
            view.offering(instance_type, run.instance.region_id.as_deref(), price_model)
        else {
            self.metrics.inc_placement_failures();
            error!(run_id = %run.id, instance_type = %instance_type, "Resolved instance vanished from catalog");
            return None;
        };

        match self.builder.build(&PlacementRequest::for_run(run, offering)) {
            Ok(pod) => Some(pod),
            Err(e) => {
                self.metrics.inc_placement_failures();
                error!(run_id = %run.id, error = %e, kind = e.kind(), "Failed to build placement");
                None
            }
        }
    }

    /// A rejected submit waits for the next cycle
    async fn submit(&self, run_id: &str, pod: Pod) {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        match self.cluster.submit_placement(pod).await {
            Ok(()) => self
                .logger
                .log_placement_submitted(run_id, &pod_name, &namespace),
            Err(e) => {
                self.metrics.inc_placement_failures();
                warn!(run_id = %run_id, error = %e, "Failed to submit placement");
            }
        }
    }
}

/// Price model for the next request and whether policy admits it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PriceChoice {
    pub(crate) model: PriceModel,
    pub(crate) admitted: bool,
}

/// SPOT while the run wants it and the spot budget lasts, else ON_DEMAND
///
/// ON_DEMAND is the fallback even when policy denies it; `admitted` reports that.
pub(crate) fn choose_price_model(
    config: &AutoscaleConfig,
    view: &ResolverView,
    run: &RunRecord,
    spot_attempts: u32,
) -> PriceChoice {
    let tool = run.tool_id.as_deref();
    let region = run.instance.region_id.as_deref();

    let spot = run.instance.spot
        && config.spot_enabled
        && spot_attempts < config.max_spot_attempts
        && view.is_price_type_allowed(PriceModel::Spot, tool, region);
    if spot {
        return PriceChoice {
            model: PriceModel::Spot,
            admitted: true,
        };
    }
    PriceChoice {
        model: PriceModel::OnDemand,
        admitted: view.is_price_type_allowed(PriceModel::OnDemand, tool, region),
    }
}

/// Builder for the coordinator; all collaborators are required
pub struct AutoscaleCoordinatorBuilder {
    config: AutoscaleConfig,
    resolver: Option<Arc<CatalogResolver>>,
    builder: PlacementBuilder,
    cluster: Option<Arc<dyn ClusterClient>>,
    provisioner: Option<Arc<dyn NodeProvisioner>>,
    runs: Option<Arc<dyn RunStore>>,
    attempts: Option<Arc<dyn AttemptStore>>,
    health: Option<HealthRegistry>,
    instance_name: String,
}

impl AutoscaleCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            config: AutoscaleConfig::default(),
            resolver: None,
            builder: PlacementBuilder::default(),
            cluster: None,
            provisioner: None,
            runs: None,
            attempts: None,
            health: None,
            instance_name: "compute-provisioner".to_string(),
        }
    }

    pub fn config(mut self, config: AutoscaleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: Arc<CatalogResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn placement(mut self, builder: PlacementBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn NodeProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn runs(mut self, runs: Arc<dyn RunStore>) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn attempts(mut self, attempts: Arc<dyn AttemptStore>) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    pub fn build(self) -> anyhow::Result<AutoscaleCoordinator> {
        let resolver = self
            .resolver
            .ok_or_else(|| anyhow::anyhow!("Catalog resolver is required"))?;
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("Cluster client is required"))?;
        let provisioner = self
            .provisioner
            .ok_or_else(|| anyhow::anyhow!("Node provisioner is required"))?;
        let runs = self
            .runs
            .ok_or_else(|| anyhow::anyhow!("Run store is required"))?;
        let attempts = self
            .attempts
            .ok_or_else(|| anyhow::anyhow!("Attempt store is required"))?;

        Ok(AutoscaleCoordinator {
            shared: Arc::new(Shared {
                config: self.config,
                resolver,
                builder: self.builder,
                cluster,
                provisioner,
                runs,
                attempts,
                exhausted: DashSet::new(),
                metrics: ProvisionerMetrics::new(),
                logger: StructuredLogger::new(self.instance_name),
            }),
            cycle_lock: Mutex::new(()),
            health: self.health,
        })
    }
}

impl Default for AutoscaleCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

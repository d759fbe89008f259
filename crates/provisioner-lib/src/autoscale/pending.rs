//! Pending workload detection from unschedulable pods

use crate::models::{PendingWorkload, UnschedulablePod};
use std::collections::{BTreeMap, HashSet};

/// Scheduler condition reason for pods that did not fit anywhere
pub const UNSCHEDULABLE_REASON: &str = "Unschedulable";

/// Scheduler messages that mean "no node has room", lowercased
const INSUFFICIENT_RESOURCE_MARKERS: &[&str] = &[
    "insufficient cpu",
    "insufficient memory",
    "insufficient nvidia.com/gpu",
    "didn't match node selector",
    "didn't match pod's node affinity",
    "node(s) didn't match",
];

/// Whether the pod is waiting for capacity rather than failing for another reason
pub fn lacks_capacity(pod: &UnschedulablePod) -> bool {
    if pod.reason.as_deref() != Some(UNSCHEDULABLE_REASON) {
        return false;
    }
    let Some(message) = pod.message.as_deref() else {
        return false;
    };
    let message = message.to_ascii_lowercase();
    INSUFFICIENT_RESOURCE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// One workload per run id, excluding runs that already own a node
///
/// Ordered by run id so every cycle visits candidates in the same order.
pub fn pending_workloads(
    pods: &[UnschedulablePod],
    runs_with_nodes: &HashSet<String>,
) -> Vec<PendingWorkload> {
    let mut by_run: BTreeMap<&str, &UnschedulablePod> = BTreeMap::new();
    for pod in pods.iter().filter(|p| lacks_capacity(p)) {
        let Some(run_id) = pod.run_id() else {
            continue;
        };
        if runs_with_nodes.contains(run_id) {
            continue;
        }
        by_run.entry(run_id).or_insert(pod);
    }

    by_run
        .into_iter()
        .map(|(run_id, pod)| PendingWorkload {
            run_id: run_id.to_string(),
            pod_name: pod.name.clone(),
            namespace: pod.namespace.clone(),
        })
        .collect()
}

//! Pod labels and owner-name sanitization

use crate::models::{labels, RunRecord};
use std::collections::BTreeMap;

/// Kubernetes label values are capped at 63 characters
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Label-safe owner name: local part of an email-like owner string
pub fn sanitize_owner(owner: &str) -> String {
    let local = owner.split('@').next().unwrap_or_default();
    let replaced: String = local
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = replaced.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let mut value: String = trimmed.chars().take(MAX_LABEL_VALUE_LEN).collect();
    // truncation may leave a trailing separator
    while value.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        value.pop();
    }

    if value.is_empty() {
        "unknown".to_string()
    } else {
        value
    }
}

/// Labels for a run's pod
pub fn pod_labels(run: &RunRecord, autoscale_enabled: bool) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    result.insert(
        labels::SPAWNED_BY.to_string(),
        labels::SPAWNED_BY_VALUE.to_string(),
    );
    result.insert(labels::OWNER.to_string(), sanitize_owner(&run.owner));
    if run.sensitive {
        result.insert(labels::SENSITIVE.to_string(), "true".to_string());
    }

    if autoscale_enabled {
        result.insert(labels::RUN_ID.to_string(), run.id.clone());
        let pod_type = if run.is_root_pod() {
            labels::ROOT_POD_TYPE
        } else {
            labels::WORKER_POD_TYPE
        };
        result.insert(labels::POD_TYPE.to_string(), pod_type.to_string());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_owner() {
        assert_eq!(sanitize_owner("jane.doe@example.com"), "jane.doe");
        assert_eq!(sanitize_owner("John Smith"), "John-Smith");
        assert_eq!(sanitize_owner("__admin__"), "admin");
        assert_eq!(sanitize_owner("@example.com"), "unknown");
        assert_eq!(sanitize_owner("!!!"), "unknown");
    }

    #[test]
    fn test_sanitize_owner_truncates() {
        let long = format!("{}-{}", "a".repeat(62), "b".repeat(10));
        let value = sanitize_owner(&long);
        assert_eq!(value.len(), 62);
        assert!(value.chars().all(|c| c == 'a'));
    }
}

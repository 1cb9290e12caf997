//! Profile evaluator: deterministic gate checking of nodes against profile
//! conditions, fanned out per profile.

use tracing::info;

use crate::kb::{KnowledgeBase, QosProfile};
use crate::state::{Intent, MetricsSnapshot, ProfileResult};

use super::fanout::scatter;

/// Pick the profiles to evaluate.
///
/// Early binding: when the intent is allocation and target profiles are
/// already known, only those are evaluated. If the filter empties the set
/// (e.g. a misspelled profile name), fall back to evaluating everything.
pub fn profiles_to_scan<'a>(
    kb: &'a KnowledgeBase,
    intent: Intent,
    target_profiles: &[String],
) -> Vec<(&'a String, &'a QosProfile)> {
    if intent == Intent::Allocation && !target_profiles.is_empty() {
        let filtered: Vec<_> = kb
            .profiles
            .iter()
            .filter(|(name, _)| target_profiles.contains(*name))
            .collect();
        if !filtered.is_empty() {
            return filtered;
        }
    }
    kb.profiles.iter().collect()
}

/// Evaluate one profile over the snapshot. A missing metric is a FAIL; the
/// audit records one line per checked predicate.
pub fn evaluate_profile(
    name: &str,
    profile: &QosProfile,
    snapshot: &MetricsSnapshot,
    target_filter: Option<&str>,
) -> ProfileResult {
    let mut result = ProfileResult {
        profile: name.to_string(),
        qualified_nodes: Default::default(),
        audit: Default::default(),
    };

    for (node, node_metrics) in &snapshot.nodes {
        if let Some(target) = target_filter {
            if node != target {
                continue;
            }
        }

        let mut qualified = true;
        let mut lines = Vec::with_capacity(profile.required_conditions.len());

        for condition in &profile.required_conditions {
            match node_metrics.get(&condition.metric) {
                None => {
                    qualified = false;
                    lines.push(format!("{}: N/A (FAIL)", condition.metric));
                    break;
                }
                Some(value) => {
                    if condition.op.apply(*value, condition.threshold) {
                        lines.push(format!(
                            "{}: {} {} {} (PASS)",
                            condition.metric, value, condition.op, condition.threshold
                        ));
                    } else {
                        qualified = false;
                        lines.push(format!(
                            "{}: {} {} {} (FAIL)",
                            condition.metric, value, condition.op, condition.threshold
                        ));
                    }
                }
            }
        }

        if qualified {
            result.qualified_nodes.insert(node.clone());
        }
        result.audit.insert(node.clone(), lines);
    }

    result
}

/// Fan out the evaluation, one concurrent task per profile.
pub async fn evaluate_profiles(
    kb: &KnowledgeBase,
    snapshot: &MetricsSnapshot,
    intent: Intent,
    target_profiles: &[String],
    target_filter: Option<&str>,
    max_parallel: usize,
) -> Vec<ProfileResult> {
    let selected = profiles_to_scan(kb, intent, target_profiles);
    info!(profiles = selected.len(), "dispatching profile evaluations");

    let tasks: Vec<(String, _)> = selected
        .into_iter()
        .map(|(name, profile)| {
            (name.clone(), async move {
                let result = evaluate_profile(name, profile, snapshot, target_filter);
                info!(
                    profile = %result.profile,
                    qualified = result.qualified_nodes.len(),
                    "profile evaluated"
                );
                Ok(result)
            })
        })
        .collect();

    scatter(tasks, max_parallel)
        .await
        .into_iter()
        .filter_map(|(_, result)| result.ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kb() -> KnowledgeBase {
        KnowledgeBase::from_json(
            r#"{
                "metrics": {
                    "cpu_usage_pct": { "query": "q1", "unit": "percentage_100" },
                    "ram_available_bytes": { "query": "q2", "unit": "bytes" }
                },
                "profiles": {
                    "cpu-bound": {
                        "required_conditions": [
                            { "metric": "cpu_usage_pct", "operator": "<", "threshold": 80 }
                        ]
                    },
                    "memory-bound": {
                        "required_conditions": [
                            { "metric": "ram_available_bytes", "operator": ">", "threshold": 1073741824 }
                        ]
                    }
                }
            }"#,
        )
        .unwrap()
    }

    fn snapshot() -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::new();
        snapshot.insert("w1", "cpu_usage_pct", 10.0);
        snapshot.insert("w1", "ram_available_bytes", 8.0 * 1024.0 * 1024.0 * 1024.0);
        snapshot.insert("w2", "cpu_usage_pct", 90.0);
        snapshot.insert("w2", "ram_available_bytes", 4.0 * 1024.0 * 1024.0 * 1024.0);
        snapshot
    }

    #[test]
    fn test_gating_and_audit_lines() {
        let kb = kb();
        let result = evaluate_profile("cpu-bound", &kb.profiles["cpu-bound"], &snapshot(), None);

        assert!(result.qualified_nodes.contains("w1"));
        assert!(!result.qualified_nodes.contains("w2"));
        assert_eq!(result.audit["w1"], vec!["cpu_usage_pct: 10 < 80 (PASS)"]);
        assert_eq!(result.audit["w2"], vec!["cpu_usage_pct: 90 < 80 (FAIL)"]);
    }

    #[test]
    fn test_missing_metric_fails_the_node() {
        let kb = kb();
        let mut snapshot = MetricsSnapshot::new();
        snapshot.insert("w1", "ram_available_bytes", 2.0e9);

        let result = evaluate_profile("cpu-bound", &kb.profiles["cpu-bound"], &snapshot, None);

        assert!(result.qualified_nodes.is_empty());
        assert_eq!(result.audit["w1"], vec!["cpu_usage_pct: N/A (FAIL)"]);
    }

    #[test]
    fn test_target_filter_restricts_nodes() {
        let kb = kb();
        let result =
            evaluate_profile("cpu-bound", &kb.profiles["cpu-bound"], &snapshot(), Some("w2"));

        assert_eq!(result.audit.len(), 1);
        assert!(result.audit.contains_key("w2"));
    }

    #[test]
    fn test_early_binding_filters_profiles() {
        let kb = kb();
        let targets = vec!["cpu-bound".to_string()];

        let selected = profiles_to_scan(&kb, Intent::Allocation, &targets);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].0, "cpu-bound");
    }

    #[test]
    fn test_misspelled_profile_falls_back_to_all() {
        let kb = kb();
        let targets = vec!["gpu-bound".to_string()];

        let selected = profiles_to_scan(&kb, Intent::Allocation, &targets);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_status_intent_scans_everything() {
        let kb = kb();
        let targets = vec!["cpu-bound".to_string()];

        let selected = profiles_to_scan(&kb, Intent::Status, &targets);
        assert_eq!(selected.len(), 2);
    }

    #[tokio::test]
    async fn test_fan_out_evaluates_all_profiles() {
        let kb = kb();
        let results =
            evaluate_profiles(&kb, &snapshot(), Intent::Status, &[], None, 4).await;

        assert_eq!(results.len(), 2);
        let cpu = results.iter().find(|r| r.profile == "cpu-bound").unwrap();
        let mem = results.iter().find(|r| r.profile == "memory-bound").unwrap();
        assert_eq!(cpu.qualified_nodes.len(), 1);
        assert_eq!(mem.qualified_nodes.len(), 2);
    }
}

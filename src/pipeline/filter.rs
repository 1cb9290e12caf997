//! Candidate filter: profile-set intersection plus the explicit-constraint
//! sweep (allocation path only).

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::state::{ExplicitConstraint, MetricsSnapshot, ProfileResult};

/// Intersect qualified node sets across the target profiles, then drop any
/// candidate violating an explicit constraint.
///
/// With no target profiles the initial set is the permissive union of every
/// qualified set. The output is lexicographically sorted.
pub fn select_candidates(
    profile_results: &[ProfileResult],
    target_profiles: &[String],
    constraints: &[ExplicitConstraint],
    snapshot: &MetricsSnapshot,
) -> Vec<String> {
    let qualification: BTreeMap<&str, &BTreeSet<String>> = profile_results
        .iter()
        .map(|r| (r.profile.as_str(), &r.qualified_nodes))
        .collect();

    let mut candidates: BTreeSet<String>;

    if target_profiles.is_empty() {
        warn!("no target profiles; considering every technically qualified node");
        candidates = BTreeSet::new();
        for nodes in qualification.values() {
            candidates.extend((*nodes).iter().cloned());
        }
    } else {
        let first = target_profiles[0].as_str();
        match qualification.get(first) {
            Some(nodes) => {
                candidates = (*nodes).clone();
                info!(profile = first, candidates = candidates.len(), "initial candidate set");
            }
            None => {
                warn!(profile = first, "no evaluation result for profile");
                candidates = BTreeSet::new();
            }
        }

        for profile in &target_profiles[1..] {
            let before = candidates.len();
            match qualification.get(profile.as_str()) {
                Some(nodes) => candidates.retain(|node| nodes.contains(node)),
                None => candidates.clear(),
            }
            info!(
                profile = %profile,
                before,
                after = candidates.len(),
                "intersected with profile"
            );
        }
    }

    let mut survivors = Vec::new();
    'nodes: for node in candidates {
        for constraint in constraints {
            match snapshot.value(&node, &constraint.metric) {
                None => {
                    info!(
                        node = %node,
                        metric = %constraint.metric,
                        "candidate dropped: metric missing"
                    );
                    continue 'nodes;
                }
                Some(value) if !constraint.op.apply(value, constraint.value) => {
                    info!(
                        node = %node,
                        metric = %constraint.metric,
                        value,
                        op = %constraint.op,
                        bound = constraint.value,
                        "candidate dropped: constraint failed"
                    );
                    continue 'nodes;
                }
                Some(_) => {}
            }
        }
        survivors.push(node);
    }

    if survivors.is_empty() {
        warn!("no candidate survived the filters");
    } else {
        info!(finalists = ?survivors, "candidates selected");
    }
    survivors
}

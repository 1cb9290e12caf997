//! Per-request pipeline state and the typed records that flow through it.
//!
//! State is created per request, mutated only by the stage currently
//! executing, and discarded after the advice is emitted. The one
//! append-accumulated field (`profile_results`) uses a commutative append
//! with a deterministic post-sort by profile name.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kb::CompareOp;

/// The role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Operator intent for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Status,
    Allocation,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status => write!(f, "status"),
            Self::Allocation => write!(f, "allocation"),
        }
    }
}

/// An instantaneous `node → metric → value` map.
///
/// Absent cells are explicitly missing, never zero; every stored value is
/// finite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub nodes: BTreeMap<String, BTreeMap<String, f64>>,
    pub taken_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            taken_at: Utc::now(),
        }
    }

    /// Record one cell.
    pub fn insert(&mut self, node: impl Into<String>, metric: impl Into<String>, value: f64) {
        self.nodes
            .entry(node.into())
            .or_default()
            .insert(metric.into(), value);
    }

    /// Look up one cell.
    pub fn value(&self, node: &str, metric: &str) -> Option<f64> {
        self.nodes.get(node)?.get(metric).copied()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution report for one metrics-engine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub elapsed_ms: u64,
    pub metric_count: usize,
    pub node_count: usize,
    pub error_count: usize,
}

/// Outcome of evaluating one profile over the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileResult {
    pub profile: String,
    pub qualified_nodes: BTreeSet<String>,
    /// Per-node audit trail, one line per checked predicate.
    pub audit: BTreeMap<String, Vec<String>>,
}

/// A numeric constraint stated by the operator, already converted to the
/// metric's native unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplicitConstraint {
    pub metric: String,
    pub op: CompareOp,
    pub value: f64,
    pub original_text: String,
}

/// Stability classification for one (node, metric) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StabilityStatus {
    Stable,
    FalseAlarm,
    Spike,
    Chaotic,
    Unknown,
}

impl StabilityStatus {
    /// Whether this status contributes a risk flag to its node.
    pub fn is_risky(self) -> bool {
        matches!(self, Self::Spike | Self::Chaotic)
    }
}

impl std::fmt::Display for StabilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => write!(f, "STABLE"),
            Self::FalseAlarm => write!(f, "FALSE_ALARM"),
            Self::Spike => write!(f, "SPIKE"),
            Self::Chaotic => write!(f, "CHAOTIC"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// One classified cell with its computed statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityCell {
    pub status: StabilityStatus,
    pub reason: String,
    pub z: f64,
    pub cv: f64,
}

/// Stability cells keyed by node, then metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StabilityReport {
    pub cells: BTreeMap<String, BTreeMap<String, StabilityCell>>,
}

impl StabilityReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: impl Into<String>, metric: impl Into<String>, cell: StabilityCell) {
        self.cells
            .entry(node.into())
            .or_default()
            .insert(metric.into(), cell);
    }

    pub fn cell(&self, node: &str, metric: &str) -> Option<&StabilityCell> {
        self.cells.get(node)?.get(metric)
    }

    /// Risk lines for one node: every SPIKE or CHAOTIC cell, in metric order.
    pub fn risks_for(&self, node: &str) -> Vec<String> {
        let Some(metrics) = self.cells.get(node) else {
            return Vec::new();
        };
        metrics
            .iter()
            .filter(|(_, cell)| cell.status.is_risky())
            .map(|(metric, cell)| format!("{metric} -> {}", cell.reason))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Append-only record of one request moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub id: Uuid,
    pub messages: Vec<Message>,
    pub sanity_ok: bool,
    pub intent: Intent,
    pub target_filter: Option<String>,
    pub active_targets: Vec<String>,
    pub snapshot: Option<MetricsSnapshot>,
    pub metrics_report: Option<MetricsReport>,
    pub target_profiles: Vec<String>,
    pub classification_reason: Option<String>,
    pub profile_results: Vec<ProfileResult>,
    pub explicit_constraints: Vec<ExplicitConstraint>,
    pub final_candidates: Vec<String>,
    pub stability: StabilityReport,
}

impl PipelineState {
    /// Create the state for a fresh request.
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: vec![Message::user(request)],
            sanity_ok: true,
            intent: Intent::Status,
            target_filter: None,
            active_targets: Vec::new(),
            snapshot: None,
            metrics_report: None,
            target_profiles: Vec::new(),
            classification_reason: None,
            profile_results: Vec::new(),
            explicit_constraints: Vec::new(),
            final_candidates: Vec::new(),
            stability: StabilityReport::new(),
        }
    }

    /// The most recent user message, if any.
    pub fn last_user_message(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// Accumulate fan-out results: commutative append, then a deterministic
    /// post-sort by profile name.
    pub fn append_profile_results(&mut self, results: Vec<ProfileResult>) {
        self.profile_results.extend(results);
        self.profile_results.sort_by(|a, b| a.profile.cmp(&b.profile));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_snapshot_missing_cells_are_missing() {
        let mut snapshot = MetricsSnapshot::new();
        snapshot.insert("worker-1", "cpu_usage_pct", 10.0);

        assert_eq!(snapshot.value("worker-1", "cpu_usage_pct"), Some(10.0));
        assert_eq!(snapshot.value("worker-1", "ram_available_bytes"), None);
        assert_eq!(snapshot.value("worker-2", "cpu_usage_pct"), None);
    }

    #[test]
    fn test_last_user_message_scans_backwards() {
        let mut state = PipelineState::new("first");
        state.messages.push(Message::assistant("report"));
        state.messages.push(Message::user("second"));

        assert_eq!(state.last_user_message(), "second");
    }

    #[test]
    fn test_profile_results_post_sorted() {
        let mut state = PipelineState::new("allocate");
        state.append_profile_results(vec![
            ProfileResult {
                profile: "memory-bound".to_string(),
                qualified_nodes: BTreeSet::new(),
                audit: BTreeMap::new(),
            },
            ProfileResult {
                profile: "cpu-bound".to_string(),
                qualified_nodes: BTreeSet::new(),
                audit: BTreeMap::new(),
            },
        ]);

        let order: Vec<_> = state.profile_results.iter().map(|r| r.profile.as_str()).collect();
        assert_eq!(order, vec!["cpu-bound", "memory-bound"]);
    }

    #[test]
    fn test_risks_skip_false_alarm_and_unknown() {
        let mut report = StabilityReport::new();
        report.insert(
            "worker-1",
            "cpu_usage_pct",
            StabilityCell {
                status: StabilityStatus::Spike,
                reason: "anomalous deviation".to_string(),
                z: 4.2,
                cv: 0.1,
            },
        );
        report.insert(
            "worker-1",
            "ram_available_bytes",
            StabilityCell {
                status: StabilityStatus::FalseAlarm,
                reason: "negligible variation".to_string(),
                z: 2.5,
                cv: 0.0,
            },
        );
        report.insert(
            "worker-1",
            "load_avg",
            StabilityCell {
                status: StabilityStatus::Unknown,
                reason: "no data".to_string(),
                z: 0.0,
                cv: 0.0,
            },
        );

        let risks = report.risks_for("worker-1");
        assert_eq!(risks, vec!["cpu_usage_pct -> anomalous deviation"]);
    }
}

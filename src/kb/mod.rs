//! QoS knowledge base: metric definitions and workload profiles.
//!
//! The knowledge base is loaded once per session from the backend's
//! `qos/config` resource. Parsing is two-phase: a tolerant raw decode of the
//! JSON document, then a validation pass that turns free-form operator and
//! threshold fields into closed types. Validation failures name the
//! offending profile so an operator can fix the document.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Unit tag attached to a metric definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricUnit {
    #[serde(rename = "percentage_100")]
    Percentage100,
    #[serde(rename = "bytes")]
    Bytes,
    #[serde(rename = "rate")]
    Rate,
    #[serde(rename = "raw")]
    Raw,
}

impl Default for MetricUnit {
    fn default() -> Self {
        Self::Raw
    }
}

impl MetricUnit {
    /// Unit-level fallback for the physical stability threshold Δ.
    pub fn fallback_threshold(self) -> f64 {
        match self {
            Self::Percentage100 => 5.0,
            Self::Bytes => 200.0 * 1024.0 * 1024.0,
            Self::Rate => 5.0,
            Self::Raw => 1.0,
        }
    }
}

/// A named metric: backend query, unit, and optional stability threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDef {
    /// Backend query string (PromQL-like).
    pub query: String,
    /// Unit tag, defaults to raw.
    #[serde(default)]
    pub unit: MetricUnit,
    /// Human description, shown to the LLM when extracting constraints.
    #[serde(default)]
    pub description: Option<String>,
    /// Minimum physically meaningful change for this metric.
    #[serde(default)]
    pub stability_threshold: Option<f64>,
}

/// Comparison operator for gate conditions and user constraints.
///
/// A closed enumeration with a dispatch table; unknown operators are a
/// config error, not a runtime surprise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl CompareOp {
    /// Parse from the wire form used in the knowledge base.
    pub fn parse(symbol: &str) -> Option<Self> {
        match symbol {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "==" | "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            _ => None,
        }
    }

    /// Evaluate `lhs <op> rhs`.
    pub fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gate predicate of a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub metric: String,
    pub op: CompareOp,
    pub threshold: f64,
}

/// Optimization direction for a scoring weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Minimize,
    Maximize,
}

/// Scoring weight for one metric inside a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringWeight {
    pub weight: f64,
    pub direction: Direction,
    /// Profile-level override for the physical stability threshold.
    #[serde(default)]
    pub stability_threshold: Option<f64>,
}

/// A named QoS profile: gate conditions plus scoring weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosProfile {
    #[serde(default)]
    pub description: String,
    pub required_conditions: Vec<Condition>,
    #[serde(default)]
    pub scoring_weights: BTreeMap<String, ScoringWeight>,
}

/// The immutable `{metrics, profiles}` pair loaded once per session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub metrics: BTreeMap<String, MetricDef>,
    pub profiles: BTreeMap<String, QosProfile>,
}

// Raw decode targets: operators and thresholds arrive as free-form JSON and
// are converted during validation so errors can name the profile.

#[derive(Debug, Deserialize)]
struct RawKb {
    #[serde(default)]
    metrics: BTreeMap<String, MetricDef>,
    #[serde(default)]
    profiles: BTreeMap<String, RawProfile>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    #[serde(default)]
    description: String,
    #[serde(default)]
    required_conditions: Vec<RawCondition>,
    #[serde(default)]
    scoring_weights: BTreeMap<String, RawWeight>,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    metric: String,
    operator: String,
    threshold: Value,
}

#[derive(Debug, Deserialize)]
struct RawWeight {
    weight: Value,
    direction: String,
    #[serde(default)]
    stability_threshold: Option<f64>,
}

fn numeric(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

impl KnowledgeBase {
    /// Parse and validate a knowledge-base document.
    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::kb_missing("resource is empty"));
        }

        let raw_kb: RawKb = serde_json::from_str(raw)
            .map_err(|e| Error::kb_missing(format!("resource is not valid JSON: {e}")))?;

        let mut profiles = BTreeMap::new();
        for (name, raw_profile) in raw_kb.profiles {
            let profile = Self::validate_profile(&name, raw_profile)?;
            profiles.insert(name, profile);
        }

        Ok(Self {
            metrics: raw_kb.metrics,
            profiles,
        })
    }

    fn validate_profile(name: &str, raw: RawProfile) -> Result<QosProfile> {
        let mut required_conditions = Vec::with_capacity(raw.required_conditions.len());
        for condition in raw.required_conditions {
            let op = CompareOp::parse(&condition.operator).ok_or_else(|| {
                Error::config_invalid(
                    name,
                    format!(
                        "unknown operator '{}' on metric '{}'",
                        condition.operator, condition.metric
                    ),
                )
            })?;
            let threshold = numeric(&condition.threshold).ok_or_else(|| {
                Error::config_invalid(
                    name,
                    format!(
                        "non-numeric threshold {} on metric '{}'",
                        condition.threshold, condition.metric
                    ),
                )
            })?;
            required_conditions.push(Condition {
                metric: condition.metric,
                op,
                threshold,
            });
        }

        let mut scoring_weights = BTreeMap::new();
        for (metric, raw_weight) in raw.scoring_weights {
            let weight = numeric(&raw_weight.weight).filter(|w| *w >= 0.0).ok_or_else(|| {
                Error::config_invalid(
                    name,
                    format!("invalid weight {} for metric '{metric}'", raw_weight.weight),
                )
            })?;
            let direction = match raw_weight.direction.as_str() {
                "minimize" => Direction::Minimize,
                "maximize" => Direction::Maximize,
                other => {
                    return Err(Error::config_invalid(
                        name,
                        format!("unknown direction '{other}' for metric '{metric}'"),
                    ))
                }
            };
            scoring_weights.insert(
                metric,
                ScoringWeight {
                    weight,
                    direction,
                    stability_threshold: raw_weight.stability_threshold,
                },
            );
        }

        Ok(QosProfile {
            description: raw.description,
            required_conditions,
            scoring_weights,
        })
    }

    /// Union of scoring-weight metric names across the given profiles.
    pub fn scoring_metrics(&self, target_profiles: &[String]) -> BTreeSet<String> {
        let mut union = BTreeSet::new();
        for name in target_profiles {
            if let Some(profile) = self.profiles.get(name) {
                union.extend(profile.scoring_weights.keys().cloned());
            }
        }
        union
    }

    /// Strictest (minimum) profile-level stability thresholds per metric,
    /// taken across the active target profiles.
    pub fn strictest_thresholds(&self, target_profiles: &[String]) -> BTreeMap<String, f64> {
        let mut thresholds: BTreeMap<String, f64> = BTreeMap::new();
        for name in target_profiles {
            let Some(profile) = self.profiles.get(name) else {
                continue;
            };
            for (metric, weight) in &profile.scoring_weights {
                let Some(override_threshold) = weight.stability_threshold else {
                    continue;
                };
                thresholds
                    .entry(metric.clone())
                    .and_modify(|current| *current = current.min(override_threshold))
                    .or_insert(override_threshold);
            }
        }
        thresholds
    }

    /// Physical stability threshold Δ for one metric: profile override,
    /// then metric default, then unit fallback.
    pub fn physical_threshold(
        &self,
        metric: &str,
        profile_overrides: &BTreeMap<String, f64>,
    ) -> f64 {
        if let Some(threshold) = profile_overrides.get(metric) {
            return *threshold;
        }
        match self.metrics.get(metric) {
            Some(def) => def
                .stability_threshold
                .unwrap_or_else(|| def.unit.fallback_threshold()),
            None => MetricUnit::Raw.fallback_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_kb() -> &'static str {
        r#"{
            "metrics": {
                "cpu_usage_pct": {
                    "query": "100 - cpu_idle",
                    "unit": "percentage_100",
                    "description": "CPU busy percentage"
                },
                "ram_available_bytes": {
                    "query": "node_memory_MemAvailable_bytes",
                    "unit": "bytes",
                    "stability_threshold": 104857600
                }
            },
            "profiles": {
                "cpu-bound": {
                    "description": "Compute heavy workloads",
                    "required_conditions": [
                        { "metric": "cpu_usage_pct", "operator": "<", "threshold": 80 }
                    ],
                    "scoring_weights": {
                        "cpu_usage_pct": {
                            "weight": 1.0,
                            "direction": "minimize",
                            "stability_threshold": 5.0
                        }
                    }
                },
                "memory-bound": {
                    "description": "RAM heavy workloads",
                    "required_conditions": [
                        { "metric": "ram_available_bytes", "operator": ">", "threshold": 1073741824 }
                    ],
                    "scoring_weights": {
                        "ram_available_bytes": { "weight": 1.0, "direction": "maximize" }
                    }
                }
            }
        }"#
    }

    #[test]
    fn test_parses_valid_document() {
        let kb = KnowledgeBase::from_json(sample_kb()).unwrap();
        assert_eq!(kb.metrics.len(), 2);
        assert_eq!(kb.profiles.len(), 2);

        let cpu_bound = &kb.profiles["cpu-bound"];
        assert_eq!(cpu_bound.required_conditions.len(), 1);
        assert_eq!(cpu_bound.required_conditions[0].op, CompareOp::Lt);
        assert_eq!(cpu_bound.required_conditions[0].threshold, 80.0);
        assert_eq!(
            cpu_bound.scoring_weights["cpu_usage_pct"].direction,
            Direction::Minimize
        );
    }

    #[test]
    fn test_empty_resource_is_kb_missing() {
        let err = KnowledgeBase::from_json("   ").unwrap_err();
        assert!(matches!(err, Error::KbMissing(_)));
    }

    #[test]
    fn test_unknown_operator_names_profile() {
        let raw = r#"{
            "metrics": {},
            "profiles": {
                "broken": {
                    "required_conditions": [
                        { "metric": "cpu_usage_pct", "operator": "~", "threshold": 1 }
                    ]
                }
            }
        }"#;
        let err = KnowledgeBase::from_json(raw).unwrap_err();
        match err {
            Error::ConfigInvalid { profile, reason } => {
                assert_eq!(profile, "broken");
                assert!(reason.contains("unknown operator"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_numeric_threshold_names_profile() {
        let raw = r#"{
            "metrics": {},
            "profiles": {
                "broken": {
                    "required_conditions": [
                        { "metric": "cpu_usage_pct", "operator": "<", "threshold": "eighty" }
                    ]
                }
            }
        }"#;
        let err = KnowledgeBase::from_json(raw).unwrap_err();
        match err {
            Error::ConfigInvalid { profile, reason } => {
                assert_eq!(profile, "broken");
                assert!(reason.contains("non-numeric threshold"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_compare_op_dispatch() {
        assert!(CompareOp::Lt.apply(1.0, 2.0));
        assert!(CompareOp::Le.apply(2.0, 2.0));
        assert!(CompareOp::Gt.apply(3.0, 2.0));
        assert!(CompareOp::Ge.apply(2.0, 2.0));
        assert!(CompareOp::Eq.apply(2.0, 2.0));
        assert!(CompareOp::Ne.apply(2.0, 3.0));
        assert!(!CompareOp::Lt.apply(2.0, 2.0));
    }

    #[test]
    fn test_threshold_cascade() {
        let kb = KnowledgeBase::from_json(sample_kb()).unwrap();
        let targets = vec!["cpu-bound".to_string(), "memory-bound".to_string()];
        let overrides = kb.strictest_thresholds(&targets);

        // Profile override wins for cpu_usage_pct.
        assert_eq!(kb.physical_threshold("cpu_usage_pct", &overrides), 5.0);
        // Metric-level default for ram_available_bytes.
        assert_eq!(
            kb.physical_threshold("ram_available_bytes", &overrides),
            104_857_600.0
        );
        // Unit fallback for an unknown metric.
        assert_eq!(kb.physical_threshold("disk_io_rate", &overrides), 1.0);
    }

    #[test]
    fn test_strictest_threshold_takes_minimum() {
        let raw = r#"{
            "metrics": {},
            "profiles": {
                "a": {
                    "required_conditions": [],
                    "scoring_weights": {
                        "cpu_usage_pct": { "weight": 1, "direction": "minimize", "stability_threshold": 8.0 }
                    }
                },
                "b": {
                    "required_conditions": [],
                    "scoring_weights": {
                        "cpu_usage_pct": { "weight": 1, "direction": "minimize", "stability_threshold": 3.0 }
                    }
                }
            }
        }"#;
        let kb = KnowledgeBase::from_json(raw).unwrap();
        let overrides = kb.strictest_thresholds(&["a".to_string(), "b".to_string()]);
        assert_eq!(overrides["cpu_usage_pct"], 3.0);
    }

    #[test]
    fn test_scoring_metrics_union() {
        let kb = KnowledgeBase::from_json(sample_kb()).unwrap();
        let union = kb.scoring_metrics(&["cpu-bound".to_string(), "memory-bound".to_string()]);
        assert_eq!(
            union.into_iter().collect::<Vec<_>>(),
            vec!["cpu_usage_pct".to_string(), "ram_available_bytes".to_string()]
        );
    }

    #[test]
    fn test_unit_fallbacks() {
        assert_eq!(MetricUnit::Percentage100.fallback_threshold(), 5.0);
        assert_eq!(MetricUnit::Bytes.fallback_threshold(), 200.0 * 1024.0 * 1024.0);
        assert_eq!(MetricUnit::Rate.fallback_threshold(), 5.0);
        assert_eq!(MetricUnit::Raw.fallback_threshold(), 1.0);
    }
}

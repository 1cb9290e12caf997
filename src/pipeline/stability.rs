//! Stability analyzer: flags candidates whose current readings are
//! anomalies against their own recent history.
//!
//! For every metric carrying a scoring weight in the target profiles, two
//! historical queries (rolling average and standard deviation) run in one
//! concurrent batch. Each (node, metric) cell is then classified from the
//! z-score and coefficient of variation, with a physical threshold Δ
//! suppressing statistically significant but operationally irrelevant
//! changes.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::backend::{parse_query_envelope, MetricsBackend};
use crate::config::StabilityConfig;
use crate::kb::KnowledgeBase;
use crate::state::{MetricsSnapshot, StabilityCell, StabilityReport, StabilityStatus};

use super::fanout::scatter;

/// Z-score above which a deviation is statistically significant.
pub const Z_THRESHOLD: f64 = 2.0;
/// Coefficient of variation above which a series is considered chaotic.
pub const CV_CHAOS_THRESHOLD: f64 = 0.3;

/// Sentinel z-score for a deviation from a flat history.
const Z_FLAT_HISTORY: f64 = 999.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum StatKind {
    Avg,
    Std,
}

/// Classify one (node, metric) cell.
///
/// Conventions: `z = 0` when `σ = 0 ∧ δ = 0`, `z = 999.9` when
/// `σ = 0 ∧ δ > 0`; `cv` is forced to 0 when the historical mean is below
/// the physical threshold, so proportional noise on a negligible baseline
/// never reads as chaos.
pub fn classify_cell(
    current: Option<f64>,
    avg: Option<f64>,
    std: Option<f64>,
    delta_threshold: f64,
) -> StabilityCell {
    let (Some(x), Some(mu), Some(sigma)) = (current, avg, std) else {
        return StabilityCell {
            status: StabilityStatus::Unknown,
            reason: "no data".to_string(),
            z: 0.0,
            cv: 0.0,
        };
    };

    let delta = (x - mu).abs();

    let z = if sigma > 0.0 {
        delta / sigma
    } else if delta == 0.0 {
        0.0
    } else {
        Z_FLAT_HISTORY
    };

    let cv = if mu < delta_threshold {
        0.0
    } else if mu > 0.0 {
        sigma / mu
    } else {
        0.0
    };

    if cv > CV_CHAOS_THRESHOLD {
        return StabilityCell {
            status: StabilityStatus::Chaotic,
            reason: format!("high variability (CV={cv:.2})"),
            z,
            cv,
        };
    }

    if z > Z_THRESHOLD {
        if delta > delta_threshold {
            return StabilityCell {
                status: StabilityStatus::Spike,
                reason: format!("anomalous deviation (+{delta:.2} above threshold {delta_threshold})"),
                z,
                cv,
            };
        }
        return StabilityCell {
            status: StabilityStatus::FalseAlarm,
            reason: "statistically visible but physically negligible variation".to_string(),
            z,
            cv,
        };
    }

    StabilityCell {
        status: StabilityStatus::Stable,
        reason: "within normal range".to_string(),
        z,
        cv,
    }
}

/// Run the historical batch and classify every (candidate, metric) cell.
pub async fn analyze(
    backend: &dyn MetricsBackend,
    kb: &KnowledgeBase,
    config: &StabilityConfig,
    max_parallel: usize,
    candidates: &[String],
    target_profiles: &[String],
    snapshot: &MetricsSnapshot,
) -> StabilityReport {
    if candidates.is_empty() || target_profiles.is_empty() {
        return StabilityReport::new();
    }

    let metrics = kb.scoring_metrics(target_profiles);
    let overrides = kb.strictest_thresholds(target_profiles);

    let mut tasks: Vec<((String, StatKind), _)> = Vec::with_capacity(metrics.len() * 2);
    for metric in &metrics {
        let Some(def) = kb.metrics.get(metric) else {
            warn!(metric = %metric, "weighted metric has no definition; history unavailable");
            continue;
        };
        for kind in [StatKind::Avg, StatKind::Std] {
            let function = match kind {
                StatKind::Avg => "avg_over_time",
                StatKind::Std => "stddev_over_time",
            };
            let query = format!(
                "{function}(({})[{}:{}])",
                def.query, config.window, config.resolution
            );
            let metric_name = metric.clone();
            tasks.push(((metric.clone(), kind), async move {
                let raw = backend.execute_query(&query).await?;
                parse_query_envelope(&raw, &metric_name)
            }));
        }
    }

    info!(queries = tasks.len(), "launching historical queries");
    let results = scatter(tasks, max_parallel).await;

    let mut avg_series: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    let mut std_series: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    for ((metric, kind), result) in results {
        match result {
            Ok(series) => {
                let slot = match kind {
                    StatKind::Avg => &mut avg_series,
                    StatKind::Std => &mut std_series,
                };
                slot.insert(metric, series);
            }
            Err(e) => {
                warn!(metric = %metric, kind = ?kind, error = %e, "historical query failed");
            }
        }
    }

    let mut report = StabilityReport::new();
    let mut anomalies = 0usize;

    for metric in &metrics {
        let delta_threshold = kb.physical_threshold(metric, &overrides);
        for node in candidates {
            let current = snapshot.value(node, metric);
            let avg = avg_series.get(metric).and_then(|s| s.get(node)).copied();
            let std = std_series.get(metric).and_then(|s| s.get(node)).copied();

            let cell = classify_cell(current, avg, std, delta_threshold);
            if cell.status.is_risky() {
                warn!(node = %node, metric = %metric, status = %cell.status, "instability detected");
                anomalies += 1;
            }
            report.insert(node.clone(), metric.clone(), cell);
        }
    }

    if anomalies == 0 {
        info!("historical analysis complete: no critical anomaly");
    } else {
        info!(anomalies, "historical analysis complete: anomalies tracked");
    }
    report
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::pipeline::testing::{envelope, MockBackend};

    #[test]
    fn test_stable_within_range() {
        let cell = classify_cell(Some(10.0), Some(10.5), Some(1.0), 5.0);
        assert_eq!(cell.status, StabilityStatus::Stable);
        assert!(cell.z < Z_THRESHOLD);
    }

    #[test]
    fn test_spike_needs_statistical_and_physical_significance() {
        // δ = 20 with σ = 2 → z = 10, and δ > Δ = 5.
        let cell = classify_cell(Some(70.0), Some(50.0), Some(2.0), 5.0);
        assert_eq!(cell.status, StabilityStatus::Spike);
    }

    #[test]
    fn test_false_alarm_when_delta_below_threshold() {
        // δ = 3 with σ = 1 → z = 3, but δ ≤ Δ = 5.
        let cell = classify_cell(Some(53.0), Some(50.0), Some(1.0), 5.0);
        assert_eq!(cell.status, StabilityStatus::FalseAlarm);
    }

    #[test]
    fn test_chaotic_on_high_cv() {
        // σ/μ = 0.4 > 0.3 with μ above the physical threshold.
        let cell = classify_cell(Some(50.0), Some(50.0), Some(20.0), 5.0);
        assert_eq!(cell.status, StabilityStatus::Chaotic);
        assert!((cell.cv - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_low_baseline_suppresses_cv() {
        // μ = 0.2 below Δ = 5: relative noise is physically meaningless.
        let cell = classify_cell(Some(0.2), Some(0.2), Some(0.15), 5.0);
        assert_eq!(cell.cv, 0.0);
        assert_eq!(cell.status, StabilityStatus::Stable);
    }

    #[test]
    fn test_flat_history_conventions() {
        // σ = 0, δ = 0 → STABLE with z = 0.
        let cell = classify_cell(Some(10.0), Some(10.0), Some(0.0), 5.0);
        assert_eq!(cell.status, StabilityStatus::Stable);
        assert_eq!(cell.z, 0.0);

        // σ = 0, δ > Δ → SPIKE with the sentinel z.
        let cell = classify_cell(Some(20.0), Some(10.0), Some(0.0), 5.0);
        assert_eq!(cell.status, StabilityStatus::Spike);
        assert_eq!(cell.z, 999.9);

        // σ = 0, 0 < δ ≤ Δ → FALSE_ALARM.
        let cell = classify_cell(Some(12.0), Some(10.0), Some(0.0), 5.0);
        assert_eq!(cell.status, StabilityStatus::FalseAlarm);
    }

    #[test]
    fn test_unknown_iff_any_input_missing() {
        assert_eq!(
            classify_cell(None, Some(1.0), Some(1.0), 5.0).status,
            StabilityStatus::Unknown
        );
        assert_eq!(
            classify_cell(Some(1.0), None, Some(1.0), 5.0).status,
            StabilityStatus::Unknown
        );
        assert_eq!(
            classify_cell(Some(1.0), Some(1.0), None, 5.0).status,
            StabilityStatus::Unknown
        );
        assert_ne!(
            classify_cell(Some(1.0), Some(1.0), Some(1.0), 5.0).status,
            StabilityStatus::Unknown
        );
    }

    fn kb() -> KnowledgeBase {
        KnowledgeBase::from_json(
            r#"{
                "metrics": {
                    "cpu_usage_pct": { "query": "cpu_q", "unit": "percentage_100" }
                },
                "profiles": {
                    "cpu-bound": {
                        "required_conditions": [],
                        "scoring_weights": {
                            "cpu_usage_pct": {
                                "weight": 1.0, "direction": "minimize",
                                "stability_threshold": 5.0
                            }
                        }
                    }
                }
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_analyze_builds_windowed_queries() {
        let backend = MockBackend::healthy()
            .with_query(
                "avg_over_time((cpu_q)[24h:5m])",
                envelope(&[("w1", 10.0)]),
            )
            .with_query(
                "stddev_over_time((cpu_q)[24h:5m])",
                envelope(&[("w1", 1.0)]),
            );

        let mut snapshot = MetricsSnapshot::new();
        snapshot.insert("w1", "cpu_usage_pct", 10.5);

        let report = analyze(
            &backend,
            &kb(),
            &StabilityConfig::default(),
            4,
            &["w1".to_string()],
            &["cpu-bound".to_string()],
            &snapshot,
        )
        .await;

        let cell = report.cell("w1", "cpu_usage_pct").unwrap();
        assert_eq!(cell.status, StabilityStatus::Stable);
    }

    #[tokio::test]
    async fn test_failed_history_yields_unknown() {
        let backend = MockBackend::healthy()
            .with_failing_query("avg_over_time((cpu_q)[24h:5m])")
            .with_query(
                "stddev_over_time((cpu_q)[24h:5m])",
                envelope(&[("w1", 1.0)]),
            );

        let mut snapshot = MetricsSnapshot::new();
        snapshot.insert("w1", "cpu_usage_pct", 10.5);

        let report = analyze(
            &backend,
            &kb(),
            &StabilityConfig::default(),
            4,
            &["w1".to_string()],
            &["cpu-bound".to_string()],
            &snapshot,
        )
        .await;

        let cell = report.cell("w1", "cpu_usage_pct").unwrap();
        assert_eq!(cell.status, StabilityStatus::Unknown);
    }

    #[tokio::test]
    async fn test_no_candidates_or_profiles_short_circuits() {
        let backend = MockBackend::healthy();
        let snapshot = MetricsSnapshot::new();

        let report = analyze(
            &backend,
            &kb(),
            &StabilityConfig::default(),
            4,
            &[],
            &["cpu-bound".to_string()],
            &snapshot,
        )
        .await;
        assert!(report.is_empty());

        let report = analyze(
            &backend,
            &kb(),
            &StabilityConfig::default(),
            4,
            &["w1".to_string()],
            &[],
            &snapshot,
        )
        .await;
        assert!(report.is_empty());
    }
}

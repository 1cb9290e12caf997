//! Deterministic presentation helpers: unit humanization and Markdown
//! tables embedded into LLM prompts and reports.

use std::collections::BTreeMap;

use crate::kb::{KnowledgeBase, MetricUnit};
use crate::state::MetricsSnapshot;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

/// Humanize a raw value according to its unit.
pub fn humanize_value(value: f64, unit: MetricUnit) -> String {
    match unit {
        MetricUnit::Percentage100 => format!("{value:.2}%"),
        MetricUnit::Bytes => {
            if value > GIB {
                format!("{:.2} GB", value / GIB)
            } else if value > MIB {
                format!("{:.2} MB", value / MIB)
            } else {
                format!("{value:.0} bytes")
            }
        }
        MetricUnit::Rate => format!("{value:.2} ops/s"),
        MetricUnit::Raw => format!("{value:.2}"),
    }
}

/// Humanize a set of raw metric readings using the knowledge base units.
/// Missing readings render as "N/A"; metrics absent from the KB fall back
/// to raw formatting.
pub fn humanize_metrics(
    raw: &BTreeMap<String, Option<f64>>,
    kb: &KnowledgeBase,
) -> BTreeMap<String, String> {
    raw.iter()
        .map(|(metric, value)| {
            let unit = kb
                .metrics
                .get(metric)
                .map(|def| def.unit)
                .unwrap_or_default();
            let rendered = match value {
                Some(v) => humanize_value(*v, unit),
                None => "N/A".to_string(),
            };
            (metric.clone(), rendered)
        })
        .collect()
}

/// Render a Markdown table from a header row and data rows.
pub fn markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "No data available.".to_string();
    }

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(format!("| {} |", headers.join(" | ")));
    lines.push(format!("| {} |", vec!["---"; headers.len()].join(" | ")));
    for row in rows {
        lines.push(format!("| {} |", row.join(" | ")));
    }
    lines.join("\n")
}

/// Catalog of profiles (name + description) for the task profiler prompt.
pub fn profiles_catalog_table(kb: &KnowledgeBase) -> String {
    let rows: Vec<Vec<String>> = kb
        .profiles
        .iter()
        .map(|(name, profile)| vec![name.clone(), profile.description.clone()])
        .collect();
    markdown_table(&["Profile", "Description"], &rows)
}

/// Catalog of metrics (name, unit, description) for the constraint
/// extractor prompt. The query column is deliberately omitted.
pub fn metrics_catalog_table(kb: &KnowledgeBase) -> String {
    let rows: Vec<Vec<String>> = kb
        .metrics
        .iter()
        .map(|(name, def)| {
            let unit = match def.unit {
                MetricUnit::Percentage100 => "percentage_100",
                MetricUnit::Bytes => "bytes",
                MetricUnit::Rate => "rate",
                MetricUnit::Raw => "raw",
            };
            vec![
                name.clone(),
                unit.to_string(),
                def.description.clone().unwrap_or_default(),
            ]
        })
        .collect();
    markdown_table(&["Metric", "Unit", "Description"], &rows)
}

/// Preview table of the live snapshot, humanized per metric unit.
pub fn snapshot_table(snapshot: &MetricsSnapshot, kb: &KnowledgeBase) -> String {
    let mut metric_names: Vec<&String> = snapshot
        .nodes
        .values()
        .flat_map(|metrics| metrics.keys())
        .collect();
    metric_names.sort();
    metric_names.dedup();

    let mut headers = vec!["Node"];
    headers.extend(metric_names.iter().map(|m| m.as_str()));

    let rows: Vec<Vec<String>> = snapshot
        .nodes
        .iter()
        .map(|(node, metrics)| {
            let mut row = vec![node.clone()];
            for metric in &metric_names {
                let unit = kb
                    .metrics
                    .get(*metric)
                    .map(|def| def.unit)
                    .unwrap_or_default();
                row.push(
                    metrics
                        .get(*metric)
                        .map(|v| humanize_value(*v, unit))
                        .unwrap_or_else(|| "N/A".to_string()),
                );
            }
            row
        })
        .collect();

    markdown_table(&headers, &rows)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::kb::KnowledgeBase;

    fn kb_with_units() -> KnowledgeBase {
        KnowledgeBase::from_json(
            r#"{
                "metrics": {
                    "cpu_usage_pct": { "query": "q1", "unit": "percentage_100" },
                    "ram_available_bytes": { "query": "q2", "unit": "bytes" },
                    "disk_io_rate": { "query": "q3", "unit": "rate" },
                    "load_avg": { "query": "q4", "unit": "raw" }
                },
                "profiles": {}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_humanize_percentage() {
        assert_eq!(humanize_value(12.3456, MetricUnit::Percentage100), "12.35%");
    }

    #[test]
    fn test_humanize_bytes_picks_binary_prefix() {
        assert_eq!(humanize_value(8.0 * GIB, MetricUnit::Bytes), "8.00 GB");
        assert_eq!(humanize_value(512.0 * MIB, MetricUnit::Bytes), "512.00 MB");
        assert_eq!(humanize_value(900.0, MetricUnit::Bytes), "900 bytes");
    }

    #[test]
    fn test_humanize_rate_and_raw() {
        assert_eq!(humanize_value(5.5, MetricUnit::Rate), "5.50 ops/s");
        assert_eq!(humanize_value(0.044, MetricUnit::Raw), "0.04");
    }

    #[test]
    fn test_humanize_bytes_round_trip() {
        // Humanizing then parsing preserves the value to two binary-prefix
        // decimals.
        let original = 8_589_934_592.0; // 8 GiB
        let rendered = humanize_value(original, MetricUnit::Bytes);
        let number: f64 = rendered
            .strip_suffix(" GB")
            .unwrap()
            .parse()
            .unwrap();
        let recovered = number * GIB;
        assert!((recovered - original).abs() / original < 0.005);
    }

    #[test]
    fn test_humanize_metrics_handles_missing() {
        let kb = kb_with_units();
        let mut raw = BTreeMap::new();
        raw.insert("cpu_usage_pct".to_string(), Some(10.0));
        raw.insert("ram_available_bytes".to_string(), None);

        let humanized = humanize_metrics(&raw, &kb);
        assert_eq!(humanized["cpu_usage_pct"], "10.00%");
        assert_eq!(humanized["ram_available_bytes"], "N/A");
    }

    #[test]
    fn test_markdown_table_shape() {
        let table = markdown_table(
            &["Node", "Score"],
            &[vec!["worker-1".to_string(), "1.00".to_string()]],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "| Node | Score |");
        assert_eq!(lines[1], "| --- | --- |");
        assert_eq!(lines[2], "| worker-1 | 1.00 |");
    }

    #[test]
    fn test_snapshot_table_orders_nodes_and_metrics() {
        let kb = kb_with_units();
        let mut snapshot = MetricsSnapshot::new();
        snapshot.insert("worker-2", "cpu_usage_pct", 90.0);
        snapshot.insert("worker-1", "cpu_usage_pct", 10.0);
        snapshot.insert("worker-1", "load_avg", 0.5);

        let table = snapshot_table(&snapshot, &kb);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "| Node | cpu_usage_pct | load_avg |");
        assert!(lines[2].starts_with("| worker-1 |"));
        assert!(lines[3].starts_with("| worker-2 |"));
        assert!(lines[3].contains("N/A"));
    }
}

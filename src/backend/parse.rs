//! Parsing of the backend's JSON payloads: query result envelopes and
//! target discovery documents.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

fn node_label(labels: &Value) -> String {
    labels
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| labels.get("instance").and_then(Value::as_str))
        .unwrap_or("unknown")
        .to_string()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Parse a standard instant-query result envelope into per-node values.
///
/// Envelope shape: `{result: [{metric: {labels}, value: [ts, "float"]}, …]}`.
/// Non-numeric or non-finite samples are logged and dropped; a missing or
/// malformed envelope is a local query error.
pub fn parse_query_envelope(raw: &str, metric: &str) -> Result<BTreeMap<String, f64>> {
    let data: Value = serde_json::from_str(raw)
        .map_err(|e| Error::query(format!("{metric}: invalid JSON envelope: {e}")))?;

    let results = data
        .get("result")
        .or_else(|| data.get("data").and_then(|d| d.get("result")))
        .and_then(Value::as_array)
        .ok_or_else(|| Error::query(format!("{metric}: unexpected envelope structure")))?;

    let mut parsed = BTreeMap::new();
    for item in results {
        let node = item.get("metric").map(node_label).unwrap_or_else(|| "unknown".to_string());

        let Some(value_pair) = item.get("value").and_then(Value::as_array) else {
            continue;
        };
        if value_pair.len() < 2 {
            continue;
        }

        let sample = &value_pair[1];
        let value = match sample {
            Value::String(s) => s.parse::<f64>().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        };

        match value.filter(|v| v.is_finite()) {
            Some(v) => {
                parsed.insert(node, round3(v));
            }
            None => {
                warn!(metric, node = %node, sample = %sample, "non-numeric sample dropped");
            }
        }
    }

    Ok(parsed)
}

/// Parse a target-discovery document into a deduplicated, sorted node list.
///
/// Shape: `{activeTargets: [{labels: {name?, instance?, …}}, …]}`; the
/// `name` label is preferred over `instance`.
pub fn parse_targets(raw: &str) -> Result<Vec<String>> {
    let data: Value = serde_json::from_str(raw)
        .map_err(|e| Error::backend_unavailable(format!("invalid targets JSON: {e}")))?;

    let targets = data
        .get("activeTargets")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::backend_unavailable("targets document has no activeTargets"))?;

    let mut names = BTreeSet::new();
    for target in targets {
        let Some(labels) = target.get("labels") else {
            continue;
        };
        let name = node_label(labels);
        if name != "unknown" {
            names.insert(name);
        }
    }

    Ok(names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_parse_envelope_prefers_name_label() {
        let raw = r#"{
            "resultType": "vector",
            "result": [
                { "metric": { "name": "worker-1", "instance": "10.0.0.1:9100" },
                  "value": [1738000000, "12.3456"] },
                { "metric": { "instance": "10.0.0.2:9100" },
                  "value": [1738000000, "98.7"] }
            ]
        }"#;
        let parsed = parse_query_envelope(raw, "cpu_usage_pct").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["worker-1"], 12.346);
        assert_eq!(parsed["10.0.0.2:9100"], 98.7);
    }

    #[test]
    fn test_parse_envelope_drops_non_numeric_samples() {
        let raw = r#"{
            "result": [
                { "metric": { "name": "worker-1" }, "value": [1738000000, "NaN"] },
                { "metric": { "name": "worker-2" }, "value": [1738000000, "not-a-number"] },
                { "metric": { "name": "worker-3" }, "value": [1738000000, "41.0"] }
            ]
        }"#;
        let parsed = parse_query_envelope(raw, "cpu_usage_pct").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["worker-3"], 41.0);
    }

    #[test]
    fn test_parse_envelope_rounds_to_three_decimals() {
        let raw = r#"{
            "result": [
                { "metric": { "name": "worker-1" }, "value": [1738000000, "0.0444999"] }
            ]
        }"#;
        let parsed = parse_query_envelope(raw, "load_avg").unwrap();
        assert_eq!(parsed["worker-1"], 0.044);
    }

    #[test]
    fn test_parse_envelope_rejects_bad_structure() {
        let err = parse_query_envelope(r#"{"unexpected": true}"#, "cpu_usage_pct").unwrap_err();
        assert!(matches!(err, Error::Query(_)));

        let err = parse_query_envelope("plain text fallback", "cpu_usage_pct").unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn test_parse_envelope_accepts_nested_data() {
        let raw = r#"{
            "data": {
                "result": [
                    { "metric": { "name": "worker-1" }, "value": [1738000000, "7"] }
                ]
            }
        }"#;
        let parsed = parse_query_envelope(raw, "cpu_usage_pct").unwrap();
        assert_eq!(parsed["worker-1"], 7.0);
    }

    #[test]
    fn test_parse_targets_dedups_and_sorts() {
        let raw = r#"{
            "activeTargets": [
                { "labels": { "name": "worker-2" } },
                { "labels": { "name": "worker-1", "instance": "10.0.0.1:9100" } },
                { "labels": { "instance": "worker-3:9100" } },
                { "labels": { "name": "worker-2" } }
            ]
        }"#;
        let targets = parse_targets(raw).unwrap();
        assert_eq!(targets, vec!["worker-1", "worker-2", "worker-3:9100"]);
    }

    #[test]
    fn test_parse_targets_rejects_missing_key() {
        let err = parse_targets(r#"{"targets": []}"#).unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }
}

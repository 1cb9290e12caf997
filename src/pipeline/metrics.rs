//! Metrics engine: concurrent retrieval of every configured instant query.
//!
//! All queries are dispatched in one scatter-gather batch with per-query
//! error isolation, then pivoted from `metric → node → value` into
//! `node → metric → value`. When a target filter is set, rows for other
//! nodes are discarded at ingest.

use std::time::Instant;

use tracing::{info, warn};

use crate::backend::{parse_query_envelope, MetricsBackend};
use crate::kb::KnowledgeBase;
use crate::state::{MetricsReport, MetricsSnapshot};

use super::fanout::scatter;

/// Run every knowledge-base query and assemble the snapshot.
pub async fn collect(
    backend: &dyn MetricsBackend,
    kb: &KnowledgeBase,
    target_filter: Option<&str>,
    max_parallel: usize,
) -> (MetricsSnapshot, MetricsReport) {
    let started = Instant::now();

    if let Some(target) = target_filter {
        info!(target, "focus mode: ingesting a single node");
    }
    info!(queries = kb.metrics.len(), "dispatching instant queries");

    let tasks: Vec<(String, _)> = kb
        .metrics
        .iter()
        .map(|(name, def)| {
            let metric = name.clone();
            let query = def.query.clone();
            (name.clone(), async move {
                let raw = backend.execute_query(&query).await?;
                parse_query_envelope(&raw, &metric)
            })
        })
        .collect();

    let results = scatter(tasks, max_parallel).await;

    let mut snapshot = MetricsSnapshot::new();
    let mut error_count = 0;

    for (metric, result) in results {
        match result {
            Ok(series) => {
                for (node, value) in series {
                    if let Some(target) = target_filter {
                        if node != target {
                            continue;
                        }
                    }
                    snapshot.insert(node, metric.clone(), value);
                }
            }
            Err(e) => {
                warn!(metric = %metric, error = %e, "metric query failed");
                error_count += 1;
            }
        }
    }

    let report = MetricsReport {
        elapsed_ms: started.elapsed().as_millis() as u64,
        metric_count: kb.metrics.len(),
        node_count: snapshot.len(),
        error_count,
    };

    info!(
        elapsed_ms = report.elapsed_ms,
        metrics = report.metric_count,
        nodes = report.node_count,
        errors = report.error_count,
        "snapshot assembled"
    );
    if snapshot.is_empty() {
        warn!("no data found for the requested target");
    }

    (snapshot, report)
}

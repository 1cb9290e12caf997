//! Context loader: boots the pipeline against the metrics backend.
//!
//! Probes backend health, enumerates active targets, and loads the QoS
//! knowledge base. Failures here are fatal for the turn; everything
//! downstream assumes a reachable backend and a parsed knowledge base.

use tracing::{info, warn};

use crate::backend::{parse_targets, MetricsBackend};
use crate::error::{Error, Result};
use crate::kb::KnowledgeBase;

const FAILURE_MARKERS: [&str; 3] = ["error", "unhealthy", "down"];

/// Everything the rest of the pipeline needs from setup.
#[derive(Debug, Clone)]
pub struct ContextOutcome {
    pub active_targets: Vec<String>,
    pub kb: KnowledgeBase,
    pub sanity_ok: bool,
}

/// Health-check the backend, discover targets, and fetch the knowledge base.
pub async fn load(backend: &dyn MetricsBackend, kb_uri: &str) -> Result<ContextOutcome> {
    let health = backend
        .health_check()
        .await
        .map_err(|e| Error::backend_unavailable(format!("health probe failed: {e}")))?;

    let lowered = health.to_lowercase();
    if FAILURE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return Err(Error::backend_unavailable(format!(
            "health probe reported: {health}"
        )));
    }
    info!("backend health probe OK");

    let targets_raw = backend
        .get_targets()
        .await
        .map_err(|e| Error::backend_unavailable(format!("target discovery failed: {e}")))?;
    let active_targets = parse_targets(&targets_raw)?;
    if active_targets.is_empty() {
        warn!("no active targets discovered");
    } else {
        info!(targets = active_targets.len(), "active targets discovered");
    }

    let kb_raw = backend
        .read_resource(kb_uri)
        .await
        .map_err(|e| Error::kb_missing(format!("failed to read '{kb_uri}': {e}")))?;
    let kb = KnowledgeBase::from_json(&kb_raw)?;

    let sanity_ok = !kb.profiles.is_empty();
    if sanity_ok {
        info!(
            metrics = kb.metrics.len(),
            profiles = kb.profiles.len(),
            "knowledge base loaded"
        );
    } else {
        warn!("knowledge base has no profiles; capability answers will be empty");
    }

    Ok(ContextOutcome {
        active_targets,
        kb,
        sanity_ok,
    })
}

//! Intent classifier: labels a request as status or allocation and
//! optionally pins it to one node.

use tracing::{info, warn};

use crate::llm::{call_structured, LlmClient, UserRequestClassification};
use crate::state::{Intent, PipelineState};

/// Answers the LLM may use to mean "no specific node".
const NULL_SENTINELS: [&str; 6] = ["none", "all", "tutti", "nessuno", "null", "n/a"];

const SYSTEM_PROMPT: &str = "You classify requests sent to an SRE capacity \
advisor.\n\nOutput fields:\n- intent: \"allocation\" when the operator wants \
a placement recommendation for a workload, \"status\" when they want a \
health/capability overview.\n- target_filter: the name of one specific node \
if the request mentions one AND it appears in the valid node list, otherwise \
null.";

/// Classify the latest user message. LLM failure degrades to the safe
/// read-only answer `(status, None)`.
pub async fn classify(
    llm: &dyn LlmClient,
    state: &PipelineState,
    max_retries: u32,
) -> (Intent, Option<String>) {
    let user_input = state.last_user_message();
    let node_list = if state.active_targets.is_empty() {
        "No nodes detected.".to_string()
    } else {
        format!("- {}", state.active_targets.join("\n- "))
    };

    let user = format!("Request: \"{user_input}\"\n\nValid nodes:\n{node_list}");

    match call_structured::<UserRequestClassification>(llm, SYSTEM_PROMPT, &user, max_retries).await
    {
        Ok(classification) => {
            let intent = match classification.intent.as_str() {
                "allocation" => Intent::Allocation,
                _ => Intent::Status,
            };
            let target = normalize_target(classification.target_filter, &state.active_targets);
            info!(%intent, target = ?target, "intent classified");
            (intent, target)
        }
        Err(e) => {
            warn!(error = %e, "intent classification failed; defaulting to status");
            (Intent::Status, None)
        }
    }
}

/// Map sentinel answers to null and enforce membership in the valid list.
fn normalize_target(raw: Option<String>, valid: &[String]) -> Option<String> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let lowered = trimmed.to_lowercase();
    if NULL_SENTINELS.contains(&lowered.as_str()) {
        return None;
    }

    if let Some(exact) = valid.iter().find(|v| *v == trimmed) {
        return Some(exact.clone());
    }
    valid.iter().find(|v| v.to_lowercase() == lowered).cloned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::pipeline::testing::ScriptedLlm;

    fn state_with_targets() -> PipelineState {
        let mut state = PipelineState::new("where should I put my batch job?");
        state.active_targets = vec!["worker-1".to_string(), "worker-2".to_string()];
        state
    }

    #[test]
    fn test_sentinels_become_null() {
        let valid = vec!["worker-1".to_string()];
        for sentinel in ["none", "ALL", "Tutti", "nessuno", "null", "N/A"] {
            assert_eq!(normalize_target(Some(sentinel.to_string()), &valid), None);
        }
    }

    #[test]
    fn test_unknown_node_becomes_null() {
        let valid = vec!["worker-1".to_string()];
        assert_eq!(normalize_target(Some("worker-9".to_string()), &valid), None);
    }

    #[test]
    fn test_case_insensitive_membership() {
        let valid = vec!["Worker-1".to_string()];
        assert_eq!(
            normalize_target(Some("worker-1".to_string()), &valid),
            Some("Worker-1".to_string())
        );
    }

    #[tokio::test]
    async fn test_classifies_allocation_with_target() {
        let llm = ScriptedLlm::new(vec![
            r#"{"intent": "allocation", "target_filter": "worker-2"}"#.to_string(),
        ]);
        let state = state_with_targets();

        let (intent, target) = classify(&llm, &state, 0).await;
        assert_eq!(intent, Intent::Allocation);
        assert_eq!(target, Some("worker-2".to_string()));
    }

    #[tokio::test]
    async fn test_llm_failure_defaults_to_status() {
        let llm = ScriptedLlm::new(vec![]);
        let state = state_with_targets();

        let (intent, target) = classify(&llm, &state, 0).await;
        assert_eq!(intent, Intent::Status);
        assert_eq!(target, None);
    }

    #[tokio::test]
    async fn test_garbage_output_defaults_to_status() {
        let llm = ScriptedLlm::new(vec!["the intent is probably allocation".to_string()]);
        let state = state_with_targets();

        let (intent, target) = classify(&llm, &state, 0).await;
        assert_eq!(intent, Intent::Status);
        assert_eq!(target, None);
    }
}

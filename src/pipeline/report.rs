//! Reporter: the adaptive capability report for status requests.
//!
//! Tables are constructed deterministically from the evaluation results and
//! embedded into the LLM prompt; the model adds prose, never data. With a
//! target filter set the report narrows to a single-node health card.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::render::markdown_table;
use crate::state::PipelineState;

use super::conversation;

/// Profile × node suitability matrix (rows are nodes, columns profiles).
pub fn suitability_matrix(state: &PipelineState) -> String {
    let results = &state.profile_results;

    let mut nodes: BTreeSet<&String> = BTreeSet::new();
    for result in results {
        nodes.extend(result.audit.keys());
    }

    let mut headers = vec!["Node"];
    headers.extend(results.iter().map(|r| r.profile.as_str()));

    let rows: Vec<Vec<String>> = nodes
        .iter()
        .filter(|node| match &state.target_filter {
            Some(target) => ***node == *target,
            None => true,
        })
        .map(|node| {
            let mut row = vec![(*node).clone()];
            for result in results {
                row.push(if result.qualified_nodes.contains(*node) {
                    "✅".to_string()
                } else {
                    "❌".to_string()
                });
            }
            row
        })
        .collect();

    markdown_table(&headers, &rows)
}

/// Per-profile audit sections with the literal pass/fail lines.
pub fn audit_trail(state: &PipelineState) -> String {
    let mut sections = Vec::new();
    for result in &state.profile_results {
        let mut lines = Vec::new();
        for (node, checks) in &result.audit {
            if let Some(target) = &state.target_filter {
                if node != target {
                    continue;
                }
            }
            lines.push(format!("- {node}: {}", checks.join("; ")));
        }
        if !lines.is_empty() {
            sections.push(format!(
                "--- Profile details: {} ---\n{}",
                result.profile,
                lines.join("\n")
            ));
        }
    }
    sections.join("\n")
}

fn mode_instructions(state: &PipelineState) -> String {
    match &state.target_filter {
        Some(target) => format!(
            "MODE: FOCUS REPORT (single node: {target}).\n\n\
             Do NOT generate cluster-wide comparison tables; the operator only \
             cares about this node.\n\n\
             Required structure (Markdown):\n\
             # Health Card: {target}\n\n\
             ## Profile Suitability\n\
             - List the profiles this node qualified for (see the matrix).\n\n\
             ## Technical Details (Audit)\n\
             - Use the detailed logs to explain which criteria passed or failed \
             for this node. Be specific with the numbers."
        ),
        None => "MODE: CLUSTER OVERVIEW.\n\n\
                 1. Present the suitability matrix comparing the nodes.\n\
                 2. Add a \"Technical Audit\" section explaining, for EACH node, \
                 the criteria it met or failed, citing the numbers from the logs."
            .to_string(),
    }
}

fn deterministic_report(matrix: &str, audit: &str) -> String {
    format!("# Capability Report\n\n{matrix}\n\n## Technical Audit\n\n{audit}")
}

/// Assemble the capability report, through the LLM when available.
pub async fn synthesize(llm: &dyn LlmClient, state: &PipelineState) -> String {
    info!(target = ?state.target_filter, "generating capability report");

    let matrix = suitability_matrix(state);
    let audit = audit_trail(state);

    let prompt = format!(
        "You are a technical SRE reporter.\n\n{}\n\n\
         SUMMARY DATA (matrix):\n{matrix}\n\n\
         DETAILED LOGS (audit trail):\n{audit}\n\n\
         Generate the final capability report in Markdown. The data is already \
         computed; report it faithfully, do not recompute or invent values.",
        mode_instructions(state)
    );

    let mut messages = conversation(state);
    messages.push(ChatMessage::user(prompt));
    let request = CompletionRequest::new()
        .with_messages(messages)
        .with_temperature(0.1)
        .with_max_tokens(4096);

    match llm.complete(request).await {
        Ok(response) => response.content,
        Err(e) => {
            warn!(error = %e, "report generation failed; emitting deterministic tables");
            deterministic_report(&matrix, &audit)
        }
    }
}

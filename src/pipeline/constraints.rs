//! Constraint extractor: numeric requirements stated by the operator,
//! converted to each metric's native unit (allocation path only).

use tracing::{info, warn};

use crate::kb::{CompareOp, KnowledgeBase};
use crate::llm::{call_structured, LlmClient, RequirementExtraction};
use crate::render::metrics_catalog_table;
use crate::state::ExplicitConstraint;

const SYSTEM_PROMPT: &str = "You are a technical constraint extractor.\n\n\
Your only goal is to find explicit numbers and requirements in the request \
and convert them into metric filters. If the request has no explicit \
numbers, return an empty list.\n\nConversion rules:\n1. RAM/disk sizes use \
binary units: 1 KB = 1024, 1 MB = 1024^2, 1 GB = 1024^3 bytes. Example: \
\"4GB free RAM\" -> metric_name: ram_available_bytes, value: 4294967296, \
operator: \">=\".\n2. Percentages stay on the 0-100 scale. Example: \"CPU \
below 20%\" -> metric_name: cpu_usage_pct, value: 20, operator: \"<\".\n3. \
Use only metric names from the catalog.\n\nOutput fields:\n- constraints: \
array of {metric_name, operator, value, original_text}.";

/// Extract explicit constraints from the request. Extraction failure never
/// blocks the pipeline; it yields an empty list.
pub async fn extract(
    llm: &dyn LlmClient,
    kb: &KnowledgeBase,
    user_input: &str,
    max_retries: u32,
) -> Vec<ExplicitConstraint> {
    let catalog = metrics_catalog_table(kb);
    let user = format!("Available metrics:\n{catalog}\n\nRequest: \"{user_input}\"");

    let extraction =
        match call_structured::<RequirementExtraction>(llm, SYSTEM_PROMPT, &user, max_retries)
            .await
        {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(error = %e, "constraint extraction failed; continuing without constraints");
                return Vec::new();
            }
        };

    let constraints = validate(extraction, kb);
    if constraints.is_empty() {
        info!("no explicit numeric constraints found");
    } else {
        for constraint in &constraints {
            info!(
                metric = %constraint.metric,
                op = %constraint.op,
                value = constraint.value,
                text = %constraint.original_text,
                "constraint extracted"
            );
        }
    }
    constraints
}

/// Keep only constraints whose operator parses and whose metric exists in
/// the knowledge base.
fn validate(extraction: RequirementExtraction, kb: &KnowledgeBase) -> Vec<ExplicitConstraint> {
    let mut constraints = Vec::new();
    for raw in extraction.constraints {
        let Some(op) = CompareOp::parse(&raw.operator) else {
            warn!(metric = %raw.metric_name, operator = %raw.operator, "constraint with unknown operator discarded");
            continue;
        };
        if !kb.metrics.contains_key(&raw.metric_name) {
            warn!(metric = %raw.metric_name, "constraint on unknown metric discarded");
            continue;
        }
        if !raw.value.is_finite() {
            warn!(metric = %raw.metric_name, "constraint with non-finite value discarded");
            continue;
        }
        constraints.push(ExplicitConstraint {
            metric: raw.metric_name,
            op,
            value: raw.value,
            original_text: raw.original_text,
        });
    }
    constraints
}

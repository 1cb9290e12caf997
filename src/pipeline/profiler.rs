//! Task profiler: maps the operator's free-text workload description onto
//! one or more QoS profiles (allocation path only).

use tracing::{info, warn};

use crate::kb::KnowledgeBase;
use crate::llm::{call_structured, LlmClient, TaskProfileIntent};
use crate::render::profiles_catalog_table;

const SYSTEM_PROMPT: &str = "You analyze the nature of a workload request \
for an SRE capacity planner.\n\nGiven the catalog of QoS profiles, select \
every profile that fits the described workload. Multi-label is allowed: a \
task can be both cpu-bound and memory-bound. If the operator names a \
technical requirement (e.g. \"lots of RAM\"), select the matching profile.\n\n\
Output fields:\n- selected_profiles: array of profile names from the \
catalog.\n- reasoning: short technical justification.";

/// Profiles matched to the workload, with the LLM's reasoning.
#[derive(Debug, Clone, Default)]
pub struct ProfilerOutcome {
    pub target_profiles: Vec<String>,
    pub reasoning: String,
}

/// Select target profiles for the described workload. Failure (or an empty
/// selection) degrades to no target profiles, which makes downstream stages
/// scan everything.
pub async fn select_profiles(
    llm: &dyn LlmClient,
    kb: &KnowledgeBase,
    user_input: &str,
    max_retries: u32,
) -> ProfilerOutcome {
    let catalog = profiles_catalog_table(kb);
    let user = format!("Available profiles:\n{catalog}\n\nRequest: \"{user_input}\"");

    match call_structured::<TaskProfileIntent>(llm, SYSTEM_PROMPT, &user, max_retries).await {
        Ok(intent) if !intent.selected_profiles.is_empty() => {
            info!(
                profiles = ?intent.selected_profiles,
                reason = %intent.reasoning,
                "workload mapped to profiles"
            );
            ProfilerOutcome {
                target_profiles: intent.selected_profiles,
                reasoning: intent.reasoning,
            }
        }
        Ok(_) => {
            warn!("profiler returned no profiles; falling back to a full scan");
            ProfilerOutcome::default()
        }
        Err(e) => {
            warn!(error = %e, "task profiling failed; falling back to a full scan");
            ProfilerOutcome::default()
        }
    }
}

//! The staged dataflow pipeline: stages connected by a typed shared state,
//! with a router deciding the allocation vs. status path.
//!
//! Stages are strictly sequential; concurrency is confined inside a stage
//! (metrics retrieval, profile evaluation, historical analysis). The
//! external channels (metrics backend, LLM) are explicit dependencies
//! threaded through the constructor.

pub mod advisor;
pub mod constraints;
pub mod context;
pub mod evaluate;
pub mod fanout;
pub mod filter;
pub mod intent;
pub mod metrics;
pub mod profiler;
pub mod report;
pub mod stability;

use std::sync::Arc;

use tracing::info;

use crate::backend::MetricsBackend;
use crate::config::AdvisorConfig;
use crate::error::Result;
use crate::llm::{ChatMessage, LlmClient};
use crate::state::{Intent, Message, PipelineState, Role};

pub use advisor::Strategy;

/// Map the pipeline conversation into LLM chat messages.
pub(crate) fn conversation(state: &PipelineState) -> Vec<ChatMessage> {
    state
        .messages
        .iter()
        .map(|m| match m.role {
            Role::System => ChatMessage::system(m.content.clone()),
            Role::User => ChatMessage::user(m.content.clone()),
            Role::Assistant => ChatMessage::assistant(m.content.clone()),
        })
        .collect()
}

/// Answer produced for one operator request.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    pub intent: Intent,
    /// Advisory posture, set on the allocation path with candidates.
    pub strategy: Option<Strategy>,
    /// Deterministic ranking table, set alongside the strategy.
    pub ranking_table: Option<String>,
    /// Final text: allocation advice or capability report.
    pub text: String,
    /// The full request state, for inspection.
    pub state: PipelineState,
}

/// The advisor pipeline. One instance serves many sequential requests; all
/// per-request data lives in [`PipelineState`].
pub struct Pipeline {
    backend: Arc<dyn MetricsBackend>,
    llm: Arc<dyn LlmClient>,
    config: AdvisorConfig,
}

impl Pipeline {
    pub fn new(
        backend: Arc<dyn MetricsBackend>,
        llm: Arc<dyn LlmClient>,
        config: AdvisorConfig,
    ) -> Self {
        Self {
            backend,
            llm,
            config,
        }
    }

    /// Run one request through the staged pipeline.
    ///
    /// Backend and knowledge-base failures during setup are fatal for the
    /// turn; every later per-query, per-profile, per-node fault is locally
    /// recovered.
    pub async fn run(&self, request: &str) -> Result<RequestOutcome> {
        let mut state = PipelineState::new(request);
        info!(request_id = %state.id, "request accepted");

        let loaded = context::load(self.backend.as_ref(), &self.config.kb_uri).await?;
        state.active_targets = loaded.active_targets;
        state.sanity_ok = loaded.sanity_ok;
        let kb = loaded.kb;

        let (intent, target_filter) =
            intent::classify(self.llm.as_ref(), &state, self.config.llm_max_retries).await;
        state.intent = intent;
        state.target_filter = target_filter;

        let (snapshot, metrics_report) = metrics::collect(
            self.backend.as_ref(),
            &kb,
            state.target_filter.as_deref(),
            self.config.max_parallel_queries,
        )
        .await;
        state.active_targets = snapshot.node_names();
        state.metrics_report = Some(metrics_report);
        if !snapshot.is_empty() {
            tracing::debug!(
                "live data snapshot:\n{}",
                crate::render::snapshot_table(&snapshot, &kb)
            );
        }

        if state.intent == Intent::Allocation {
            let user_input = state.last_user_message().to_string();
            let profiled = profiler::select_profiles(
                self.llm.as_ref(),
                &kb,
                &user_input,
                self.config.llm_max_retries,
            )
            .await;
            state.target_profiles = profiled.target_profiles;
            state.classification_reason = Some(profiled.reasoning);
        }

        let results = evaluate::evaluate_profiles(
            &kb,
            &snapshot,
            state.intent,
            &state.target_profiles,
            state.target_filter.as_deref(),
            self.config.max_parallel_queries,
        )
        .await;
        state.append_profile_results(results);

        let outcome = match state.intent {
            Intent::Status => {
                let text = report::synthesize(self.llm.as_ref(), &state).await;
                state.messages.push(Message::assistant(text.clone()));
                state.snapshot = Some(snapshot);
                RequestOutcome {
                    intent: Intent::Status,
                    strategy: None,
                    ranking_table: None,
                    text,
                    state,
                }
            }
            Intent::Allocation => {
                let user_input = state.last_user_message().to_string();
                state.explicit_constraints = constraints::extract(
                    self.llm.as_ref(),
                    &kb,
                    &user_input,
                    self.config.llm_max_retries,
                )
                .await;

                state.final_candidates = filter::select_candidates(
                    &state.profile_results,
                    &state.target_profiles,
                    &state.explicit_constraints,
                    &snapshot,
                );

                state.stability = stability::analyze(
                    self.backend.as_ref(),
                    &kb,
                    &self.config.stability,
                    self.config.max_parallel_queries,
                    &state.final_candidates,
                    &state.target_profiles,
                    &snapshot,
                )
                .await;

                let advised =
                    advisor::advise(self.llm.as_ref(), &kb, &snapshot, &state).await;
                state.messages.push(Message::assistant(advised.advice.clone()));
                state.snapshot = Some(snapshot);
                RequestOutcome {
                    intent: Intent::Allocation,
                    strategy: advised.strategy,
                    ranking_table: advised.ranking_table,
                    text: advised.advice,
                    state,
                }
            }
        };

        info!(request_id = %outcome.state.id, intent = %outcome.intent, "request complete");
        Ok(outcome)
    }
}

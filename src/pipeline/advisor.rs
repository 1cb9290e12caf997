//! Allocation advisor: weighted scoring, ranking, rescue scan, and the
//! final recommendation.
//!
//! All numeric work happens here, deterministically. The LLM only explains
//! a ranking that is already fixed; with no candidates it is not invoked at
//! all.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::kb::{Direction, KnowledgeBase, ScoringWeight};
use crate::llm::{ChatMessage, CompletionRequest, LlmClient};
use crate::render::{humanize_metrics, markdown_table};
use crate::state::{MetricsSnapshot, PipelineState, StabilityReport};

use super::conversation;

/// Advisory posture selected from the ranking and the rescue scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    ClearWinner,
    ConsiderRunnerUp,
    ProposeSafeHaven,
    AllRisky,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClearWinner => write!(f, "CLEAR_WINNER"),
            Self::ConsiderRunnerUp => write!(f, "CONSIDER_RUNNER_UP"),
            Self::ProposeSafeHaven => write!(f, "PROPOSE_SAFE_HAVEN"),
            Self::AllRisky => write!(f, "ALL_RISKY"),
        }
    }
}

/// One candidate with its final score and risk flags.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub node: String,
    pub score: f64,
    pub risks: Vec<String>,
}

/// The full deterministic ranking outcome.
#[derive(Debug, Clone)]
pub struct RankingOutcome {
    pub ranked: Vec<RankedCandidate>,
    pub winner: String,
    pub runner_up: Option<String>,
    pub safe_haven: Option<String>,
    pub strategy: Strategy,
    /// Candidates surfaced to the LLM and the operator.
    pub shown: Vec<String>,
}

/// What the advisor hands back to the caller.
#[derive(Debug, Clone)]
pub struct AdvisorOutcome {
    pub strategy: Option<Strategy>,
    pub ranking_table: Option<String>,
    pub advice: String,
}

/// Mix scoring weights across the target profiles: insert when absent,
/// replace when a profile carries a higher weight for the same metric, then
/// normalize so weights sum to 1. With no target profiles a default
/// CPU-minimizing weight map applies.
pub fn mix_weights(
    kb: &KnowledgeBase,
    target_profiles: &[String],
) -> BTreeMap<String, ScoringWeight> {
    let mut active: BTreeMap<String, ScoringWeight> = BTreeMap::new();

    if target_profiles.is_empty() {
        active.insert(
            "cpu_usage_pct".to_string(),
            ScoringWeight {
                weight: 1.0,
                direction: Direction::Minimize,
                stability_threshold: None,
            },
        );
    } else {
        for name in target_profiles {
            let Some(profile) = kb.profiles.get(name) else {
                continue;
            };
            for (metric, weight) in &profile.scoring_weights {
                match active.get(metric) {
                    Some(existing) if weight.weight <= existing.weight => {}
                    _ => {
                        active.insert(metric.clone(), weight.clone());
                    }
                }
            }
        }
    }

    let total: f64 = active.values().map(|w| w.weight).sum();
    if total > 0.0 {
        for weight in active.values_mut() {
            weight.weight /= total;
        }
    }
    active
}

/// Per-metric min-max scoring accumulated into a weighted sum per node.
/// A metric with zero spread contributes a full component score to every
/// candidate holding a reading.
pub fn score_candidates(
    weights: &BTreeMap<String, ScoringWeight>,
    snapshot: &MetricsSnapshot,
    candidates: &[String],
) -> BTreeMap<String, f64> {
    let mut scores: BTreeMap<String, f64> =
        candidates.iter().map(|c| (c.clone(), 0.0)).collect();

    for (metric, weight) in weights {
        let readings: Vec<(&String, f64)> = candidates
            .iter()
            .filter_map(|node| snapshot.value(node, metric).map(|v| (node, v)))
            .collect();
        if readings.is_empty() {
            continue;
        }

        let min_v = readings.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
        let max_v = readings.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
        let spread = max_v - min_v;

        for (node, value) in readings {
            let component = if spread == 0.0 {
                1.0
            } else {
                match weight.direction {
                    Direction::Minimize => (max_v - value) / spread,
                    Direction::Maximize => (value - min_v) / spread,
                }
            };
            if let Some(score) = scores.get_mut(node) {
                *score += component * weight.weight;
            }
        }
    }

    scores
}

/// Sort by descending score, ties broken lexicographically by node name.
pub fn rank(scores: BTreeMap<String, f64>, stability: &StabilityReport) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = scores
        .into_iter()
        .map(|(node, score)| RankedCandidate {
            risks: stability.risks_for(&node),
            node,
            score,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.node.cmp(&b.node))
    });
    ranked
}

/// Rescue scan and strategy selection over a non-empty ranking.
pub fn resolve(ranked: Vec<RankedCandidate>) -> RankingOutcome {
    let winner = ranked[0].node.clone();
    let runner_up = ranked.get(1).map(|c| c.node.clone());
    let safe_haven = ranked
        .iter()
        .find(|c| c.risks.is_empty())
        .map(|c| c.node.clone());

    let mut shown = vec![winner.clone()];
    if let Some(node) = &runner_up {
        shown.push(node.clone());
    }

    let winner_is_safe = ranked[0].risks.is_empty();
    let strategy = if winner_is_safe {
        Strategy::ClearWinner
    } else if let Some(haven) = &safe_haven {
        if runner_up.as_deref() == Some(haven.as_str()) {
            Strategy::ConsiderRunnerUp
        } else {
            shown.push(haven.clone());
            Strategy::ProposeSafeHaven
        }
    } else {
        Strategy::AllRisky
    };

    RankingOutcome {
        ranked,
        winner,
        runner_up,
        safe_haven,
        strategy,
        shown,
    }
}

/// Render the deterministic ranking table shown to the operator.
pub fn ranking_table(outcome: &RankingOutcome) -> String {
    let rows: Vec<Vec<String>> = outcome
        .ranked
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            let mut name = candidate.node.clone();
            if outcome.safe_haven.as_deref() == Some(candidate.node.as_str())
                && candidate.node != outcome.winner
            {
                name.push_str(" (safe haven)");
            }
            let stability = if candidate.risks.is_empty() {
                "OK".to_string()
            } else {
                candidate.risks.join(", ")
            };
            vec![
                (i + 1).to_string(),
                name,
                format!("{:.4}", candidate.score),
                stability,
            ]
        })
        .collect();

    markdown_table(&["Rank", "Node", "Score", "Stability"], &rows)
}

fn candidate_context_table(
    kb: &KnowledgeBase,
    snapshot: &MetricsSnapshot,
    weights: &BTreeMap<String, ScoringWeight>,
    outcome: &RankingOutcome,
) -> String {
    let mut headers: Vec<&str> = vec!["Node", "Score", "Risks"];
    let metric_names: Vec<&String> = weights.keys().collect();
    headers.extend(metric_names.iter().map(|m| m.as_str()));

    let rows: Vec<Vec<String>> = outcome
        .shown
        .iter()
        .filter_map(|node| {
            let candidate = outcome.ranked.iter().find(|c| &c.node == node)?;
            let raw: BTreeMap<String, Option<f64>> = metric_names
                .iter()
                .map(|metric| ((*metric).clone(), snapshot.value(node, metric)))
                .collect();
            let humanized = humanize_metrics(&raw, kb);

            let mut row = vec![
                node.clone(),
                format!("{:.2}", candidate.score),
                if candidate.risks.is_empty() {
                    "STABLE".to_string()
                } else {
                    candidate.risks.join("; ")
                },
            ];
            for metric in &metric_names {
                row.push(humanized.get(*metric).cloned().unwrap_or_else(|| "N/A".to_string()));
            }
            Some(row)
        })
        .collect();

    markdown_table(&headers, &rows)
}

fn strategy_instructions(outcome: &RankingOutcome) -> String {
    let winner = &outcome.winner;
    let runner_up = outcome.runner_up.as_deref().unwrap_or("none");
    match outcome.strategy {
        Strategy::ClearWinner => format!(
            "- FOCUS: immediate confirmation.\n\
             - SITUATION: '{winner}' is the dominant choice on both performance and stability.\n\
             - ACTION: recommend it decisively, citing the specific metrics that make it superior."
        ),
        Strategy::ConsiderRunnerUp => format!(
            "- FOCUS: trade-off between power and safety.\n\
             - SITUATION: '{winner}' is the strongest candidate but carries risks (see its risks \
             column). '{runner_up}' is the stable alternative.\n\
             - ACTION: highlight the winner's risks and propose '{runner_up}' as the solid \
             alternative for workloads that cannot tolerate failures."
        ),
        Strategy::ProposeSafeHaven => {
            let haven = outcome.safe_haven.as_deref().unwrap_or("none");
            format!(
                "- FOCUS: risk mitigation (critical warning).\n\
                 - SITUATION: the top-ranked candidates are unstable; explain why.\n\
                 - ACTION: shift the recommendation to the safe haven '{haven}'. Although \
                 '{winner}' has better performance metrics, for critical workloads '{haven}' is \
                 the only node with guaranteed operational stability."
            )
        }
        Strategy::AllRisky => format!(
            "- FOCUS: managing uncertainty.\n\
             - SITUATION: no node offers complete stability guarantees; explain each node's \
             issues.\n\
             - ACTION: recommend '{winner}' as the least bad, technically best choice, and \
             attach a mandatory disclaimer about its instability."
        ),
    }
}

fn build_prompt(outcome: &RankingOutcome, context_table: &str) -> String {
    let runner_up = outcome.runner_up.as_deref().unwrap_or("none");
    format!(
        "You are an advanced SRE allocation advisor.\n\n\
         STRATEGY SELECTED BY THE ALGORITHM: {}\n\n\
         Relevant candidate data:\n{context_table}\n\n\
         TASK:\n\
         Write a professional recommendation for the operator.\n\
         State the strengths of {} over {}, and its weaknesses if present; never invent \
         positive justifications for a weakness, admit it instead.\n\
         Ground every statement in the data above and cite each listed metric.\n\
         The ranking is already decided; explain it, do not change it.\n\n\
         GENERATION INSTRUCTIONS:\n{}",
        outcome.strategy,
        outcome.winner,
        runner_up,
        strategy_instructions(outcome)
    )
}

fn fallback_advice(outcome: &RankingOutcome) -> String {
    let mut advice = format!(
        "Recommended node: {} (strategy {}).",
        outcome.winner, outcome.strategy
    );
    if let Some(haven) = &outcome.safe_haven {
        if haven != &outcome.winner {
            advice.push_str(&format!(" Stable alternative: {haven}."));
        }
    }
    advice
}

/// Produce the final allocation advice for the current state.
pub async fn advise(
    llm: &dyn LlmClient,
    kb: &KnowledgeBase,
    snapshot: &MetricsSnapshot,
    state: &PipelineState,
) -> AdvisorOutcome {
    if state.final_candidates.is_empty() {
        info!("no candidates; emitting deterministic answer without the LLM");
        return AdvisorOutcome {
            strategy: None,
            ranking_table: None,
            advice: "No suitable node found: no candidate satisfies the requested profiles \
                     and constraints."
                .to_string(),
        };
    }

    let weights = mix_weights(kb, &state.target_profiles);
    let scores = score_candidates(&weights, snapshot, &state.final_candidates);
    let ranked = rank(scores, &state.stability);
    let outcome = resolve(ranked);

    let table = ranking_table(&outcome);
    info!(
        strategy = %outcome.strategy,
        winner = %outcome.winner,
        safe_haven = ?outcome.safe_haven,
        "ranking and rescue scan complete"
    );

    let context_table = candidate_context_table(kb, snapshot, &weights, &outcome);
    let prompt = build_prompt(&outcome, &context_table);

    let mut messages = conversation(state);
    messages.push(ChatMessage::user(prompt));
    let request = CompletionRequest::new()
        .with_messages(messages)
        .with_temperature(0.1)
        .with_max_tokens(4096);

    let advice = match llm.complete(request).await {
        Ok(response) => response.content,
        Err(e) => {
            warn!(error = %e, "advice generation failed; emitting deterministic summary");
            fallback_advice(&outcome)
        }
    };

    AdvisorOutcome {
        strategy: Some(outcome.strategy),
        ranking_table: Some(table),
        advice,
    }
}

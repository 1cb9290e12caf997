//! Structured-output calls: typed JSON contracts over plain completions.
//!
//! The model is asked for a bare JSON object matching a named field list;
//! the response is scrubbed of code fences and surrounding prose, then
//! deserialized into the schema type. Parse failures retry with a bounded
//! budget before surfacing a classification error; callers recover per
//! their own documented fallback.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::client::LlmClient;
use super::types::{ChatMessage, CompletionRequest};

/// Intent and optional node focus extracted from the operator request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequestClassification {
    pub intent: String,
    #[serde(default)]
    pub target_filter: Option<String>,
}

/// Profile names matched to the described workload, with reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProfileIntent {
    pub selected_profiles: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// One numeric constraint stated by the operator, in wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConstraint {
    pub metric_name: String,
    pub operator: String,
    pub value: f64,
    #[serde(default)]
    pub original_text: String,
}

/// Extracted numeric constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementExtraction {
    #[serde(default)]
    pub constraints: Vec<RawConstraint>,
}

/// Pull the first JSON object out of a model response, tolerating code
/// fences and prose around it.
pub fn extract_json_object(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    let body = if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        match after.find("```") {
            Some(fence_end) => &after[..fence_end],
            None => after,
        }
    } else {
        trimmed
    };

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}

/// Execute a structured-output call with bounded retries.
///
/// `system` carries the task instructions plus the output field list;
/// `user` carries the request context.
pub async fn call_structured<T: DeserializeOwned>(
    client: &dyn LlmClient,
    system: &str,
    user: &str,
    max_retries: u32,
) -> Result<T> {
    let request = CompletionRequest::new()
        .with_system(format!(
            "{system}\n\nRespond with only the JSON object, no additional text."
        ))
        .with_message(ChatMessage::user(user))
        .with_temperature(0.1)
        .with_max_tokens(4096);

    let mut last_error = None;
    for attempt in 0..=max_retries {
        let response = match client.complete(request.clone()).await {
            Ok(response) => response,
            Err(e) => {
                last_error = Some(e);
                continue;
            }
        };

        let Some(json) = extract_json_object(&response.content) else {
            debug!(attempt, "no JSON object in structured response");
            last_error = Some(Error::Classification(format!(
                "no JSON object in response: {}",
                preview(&response.content)
            )));
            continue;
        };

        match serde_json::from_str::<T>(json) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => {
                debug!(attempt, error = %e, "structured response failed to deserialize");
                last_error = Some(Error::Classification(format!(
                    "response did not match schema: {e}"
                )));
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| Error::Classification("structured call produced no output".to_string())))
}

fn preview(content: &str) -> String {
    let mut preview: String = content.chars().take(120).collect();
    if preview.len() < content.len() {
        preview.push_str("...");
    }
    preview
}

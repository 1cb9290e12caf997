//! LLM seam: client trait, Groq provider, and structured-output contracts.

mod client;
mod structured;
mod types;

pub use client::{ClientConfig, GroqClient, LlmClient};
pub use structured::{
    call_structured, extract_json_object, RawConstraint, RequirementExtraction, TaskProfileIntent,
    UserRequestClassification,
};
pub use types::{ChatMessage, ChatRole, CompletionRequest, CompletionResponse, TokenUsage};

//! # qos-advisor
//!
//! A neuro-symbolic SRE advisor answering two classes of operator
//! questions about a fleet of monitored nodes:
//!
//! - **Status**: which nodes satisfy which QoS profiles right now?
//! - **Allocation**: which node should a workload of a given type land on?
//!
//! Natural-language understanding and report wording go through an LLM;
//! every number (metric retrieval, profile gating, candidate filtering,
//! historical stability analysis, weighted scoring, rescue-scan ranking)
//! is computed by the deterministic core in [`pipeline`].
//!
//! ## Core Components
//!
//! - **Backend**: the tool-invocation channel to the metrics store
//! - **Kb**: the QoS knowledge base (metrics + profiles)
//! - **Llm**: the LLM seam with typed structured-output contracts
//! - **Pipeline**: the staged dataflow from request to advice
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qos_advisor::{AdvisorConfig, BackendConfig, ClientConfig, GroqClient,
//!                   Pipeline, StdioBackend};
//!
//! let backend = Arc::new(StdioBackend::spawn(&BackendConfig::new("prometheus-tool-server"))?);
//! let llm = Arc::new(GroqClient::new(ClientConfig::new(api_key))?);
//! let pipeline = Pipeline::new(backend, llm, AdvisorConfig::default());
//!
//! let outcome = pipeline.run("where should I place a memory-hungry batch job?").await?;
//! println!("{}", outcome.text);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod kb;
pub mod llm;
pub mod pipeline;
pub mod render;
pub mod state;

// Re-exports for convenience
pub use backend::{MetricsBackend, StdioBackend};
pub use config::{AdvisorConfig, BackendConfig, StabilityConfig};
pub use error::{Error, Result};
pub use kb::{
    CompareOp, Condition, Direction, KnowledgeBase, MetricDef, MetricUnit, QosProfile,
    ScoringWeight,
};
pub use llm::{
    ChatMessage, ChatRole, ClientConfig, CompletionRequest, CompletionResponse, GroqClient,
    LlmClient,
};
pub use pipeline::{Pipeline, RequestOutcome, Strategy};
pub use state::{
    ExplicitConstraint, Intent, Message, MetricsReport, MetricsSnapshot, PipelineState,
    ProfileResult, Role, StabilityCell, StabilityReport, StabilityStatus,
};

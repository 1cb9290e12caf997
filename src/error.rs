//! Error types for the QoS advisor.

use thiserror::Error;

/// Result type alias using the advisor's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while answering an operator request.
#[derive(Error, Debug)]
pub enum Error {
    /// Metrics backend failed its health probe or the tool channel is gone
    #[error("metrics backend unavailable: {0}")]
    BackendUnavailable(String),

    /// QoS knowledge base resource absent, empty, or unreadable
    #[error("QoS knowledge base missing: {0}")]
    KbMissing(String),

    /// A single metric query failed or returned an unparseable envelope.
    /// Local: the metric is absent downstream, the request continues.
    #[error("query error: {0}")]
    Query(String),

    /// LLM structured output did not match the expected schema
    #[error("classification error: {0}")]
    Classification(String),

    /// Malformed knowledge base entry (unknown operator, non-numeric threshold)
    #[error("invalid configuration in profile '{profile}': {reason}")]
    ConfigInvalid { profile: String, reason: String },

    /// LLM API error
    #[error("LLM error: {0}")]
    Llm(String),

    /// External call deadline expired
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Backend transport (subprocess channel) communication error
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a backend-unavailable error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable(message.into())
    }

    /// Create a knowledge-base-missing error.
    pub fn kb_missing(message: impl Into<String>) -> Self {
        Self::KbMissing(message.into())
    }

    /// Create a local query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Create a config-invalid error for a named profile.
    pub fn config_invalid(profile: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            profile: profile.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }
}

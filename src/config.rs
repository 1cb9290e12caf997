//! Configuration for the advisor pipeline and its external channels.

use serde::{Deserialize, Serialize};

/// Default URI of the QoS knowledge base resource on the backend.
pub const DEFAULT_KB_URI: &str = "qos/config";

/// Default maximum concurrent backend queries per fan-out stage.
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Configuration for the metrics-backend transport subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Command used to start the tool server (resolved against PATH).
    pub command: String,
    /// Arguments passed to the command.
    pub args: Vec<String>,
    /// Per-call deadline in seconds. Expiry is a local error, never an abort.
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout_secs: 30,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Knobs for the historical stability analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Rolling window for historical aggregation (PromQL duration).
    pub window: String,
    /// Sample resolution inside the window (PromQL duration).
    pub resolution: String,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            window: "24h".to_string(),
            resolution: "5m".to_string(),
        }
    }
}

/// Top-level configuration threaded through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// URI of the knowledge-base resource on the metrics backend.
    pub kb_uri: String,
    /// Maximum concurrent queries inside a single fan-out stage.
    pub max_parallel_queries: usize,
    /// Retries for LLM structured-output calls before falling back.
    pub llm_max_retries: u32,
    /// Stability analysis knobs.
    pub stability: StabilityConfig,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            kb_uri: DEFAULT_KB_URI.to_string(),
            max_parallel_queries: DEFAULT_MAX_PARALLEL,
            llm_max_retries: 2,
            stability: StabilityConfig::default(),
        }
    }
}

impl AdvisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kb_uri(mut self, uri: impl Into<String>) -> Self {
        self.kb_uri = uri.into();
        self
    }

    pub fn with_max_parallel_queries(mut self, max: usize) -> Self {
        self.max_parallel_queries = max.max(1);
        self
    }

    pub fn with_llm_max_retries(mut self, retries: u32) -> Self {
        self.llm_max_retries = retries;
        self
    }

    pub fn with_stability(mut self, stability: StabilityConfig) -> Self {
        self.stability = stability;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AdvisorConfig::default();
        assert_eq!(config.kb_uri, "qos/config");
        assert_eq!(config.stability.window, "24h");
        assert_eq!(config.stability.resolution, "5m");
        assert_eq!(config.max_parallel_queries, DEFAULT_MAX_PARALLEL);
    }

    #[test]
    fn test_builder_clamps_parallelism() {
        let config = AdvisorConfig::new().with_max_parallel_queries(0);
        assert_eq!(config.max_parallel_queries, 1);
    }
}

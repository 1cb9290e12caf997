//! Metrics backend seam: the tool-invocation channel to the time-series
//! database, plus parsing of its JSON payloads.

mod parse;
mod transport;

pub use parse::{parse_query_envelope, parse_targets};
pub use transport::StdioBackend;

use async_trait::async_trait;

use crate::error::Result;

/// The tool surface the metrics backend must expose.
///
/// All methods return the raw text payload of the tool result; parsing
/// lives in [`parse`] so mock backends in tests can return canned JSON.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Probe backend health; the returned text is inspected for failure
    /// markers by the context loader.
    async fn health_check(&self) -> Result<String>;

    /// Fetch the target-discovery document.
    async fn get_targets(&self) -> Result<String>;

    /// Run one instant query and return its result envelope.
    async fn execute_query(&self, query: &str) -> Result<String>;

    /// Read a named resource (the QoS knowledge base lives here).
    async fn read_resource(&self, uri: &str) -> Result<String>;
}

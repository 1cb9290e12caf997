//! Stdio JSON-RPC transport to the metrics tool server.
//!
//! The backend is a child process speaking JSON-RPC 2.0 over stdin/stdout,
//! one message per line. A single transport is shared by all concurrent
//! queries: requests are multiplexed by id through a pending-response map,
//! writes are serialized through a mutex, and a reader task routes each
//! response line to its waiting caller. Every call carries the configured
//! deadline; expiry is reported to the caller and never tears down the
//! channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::{Error, Result};

use super::MetricsBackend;

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<RpcOutcome>>>;
type RpcOutcome = std::result::Result<Value, RpcError>;

#[derive(Debug, Clone, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    method: String,
    params: Value,
    id: u64,
}

impl JsonRpcRequest {
    fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
    id: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

/// Metrics backend reached through a child-process JSON-RPC channel.
pub struct StdioBackend {
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    call_timeout: Duration,
    // Held so the child is killed when the backend is dropped.
    _child: tokio::process::Child,
}

impl StdioBackend {
    /// Spawn the configured tool server and wire up the response router.
    pub fn spawn(config: &BackendConfig) -> Result<Self> {
        let command_path = resolve_command(&config.command);

        let mut child = Command::new(&command_path)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::backend_unavailable(format!(
                    "failed to start '{}': {e}",
                    command_path.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Transport("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("child stdout not captured".to_string()))?;

        let pending: Arc<PendingMap> = Arc::new(Mutex::new(HashMap::new()));

        let router_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                route_response(&router_pending, &line);
            }
            // Channel gone: fail everything still waiting.
            let mut map = lock_pending(&router_pending);
            for (_, sender) in map.drain() {
                let _ = sender.send(Err(RpcError {
                    code: -1,
                    message: "backend channel closed".to_string(),
                }));
            }
        });

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "backend", "{line}");
                }
            });
        }

        Ok(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            call_timeout: Duration::from_secs(config.timeout_secs),
            _child: child,
        })
    }

    async fn invoke(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);

        let request = JsonRpcRequest::new(method, params, id);
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                lock_pending(&self.pending).remove(&id);
                return Err(Error::Transport(format!("stdin write failed: {e}")));
            }
            if let Err(e) = stdin.flush().await {
                lock_pending(&self.pending).remove(&id);
                return Err(Error::Transport(format!("stdin flush failed: {e}")));
            }
        }

        match timeout(self.call_timeout, rx).await {
            Err(_) => {
                lock_pending(&self.pending).remove(&id);
                Err(Error::timeout(self.call_timeout.as_millis() as u64))
            }
            Ok(Err(_)) => Err(Error::Transport(
                "response channel dropped before reply".to_string(),
            )),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(rpc))) => Err(Error::query(format!(
                "backend error {}: {}",
                rpc.code, rpc.message
            ))),
        }
    }
}

fn lock_pending(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcOutcome>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn route_response(pending: &PendingMap, line: &str) {
    let response: JsonRpcResponse = match serde_json::from_str(line) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "unparseable line from backend");
            return;
        }
    };

    let Some(id) = response.id else {
        debug!("backend notification ignored");
        return;
    };

    let Some(sender) = lock_pending(pending).remove(&id) else {
        // Caller gave up (timeout or cancellation); drop the late reply.
        return;
    };

    let outcome = match (response.result, response.error) {
        (_, Some(error)) => Err(error),
        (Some(result), None) => Ok(result),
        (None, None) => Ok(Value::Null),
    };
    let _ = sender.send(outcome);
}

fn resolve_command(command: &str) -> PathBuf {
    let expanded = shellexpand::tilde(command).into_owned();
    which::which(&expanded).unwrap_or_else(|_| PathBuf::from(expanded))
}

/// Unwrap the tool-invocation payload: results arrive either as a plain
/// string, a `{text}` object, or a list of content blocks.
fn text_payload(value: Value) -> String {
    match &value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .first()
            .and_then(|item| item.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| value.to_string()),
        Value::Object(map) => {
            if let Some(text) = map.get("text").and_then(Value::as_str) {
                return text.to_string();
            }
            if let Some(text) = map
                .get("content")
                .and_then(Value::as_array)
                .and_then(|blocks| blocks.first())
                .and_then(|block| block.get("text"))
                .and_then(Value::as_str)
            {
                return text.to_string();
            }
            value.to_string()
        }
        _ => value.to_string(),
    }
}

#[async_trait]
impl MetricsBackend for StdioBackend {
    async fn health_check(&self) -> Result<String> {
        let value = self.invoke("health_check", json!({})).await?;
        Ok(text_payload(value))
    }

    async fn get_targets(&self) -> Result<String> {
        let value = self.invoke("get_targets", json!({})).await?;
        Ok(text_payload(value))
    }

    async fn execute_query(&self, query: &str) -> Result<String> {
        let value = self.invoke("execute_query", json!({ "query": query })).await?;
        Ok(text_payload(value))
    }

    async fn read_resource(&self, uri: &str) -> Result<String> {
        let value = self.invoke("read_resource", json!({ "uri": uri })).await?;
        Ok(text_payload(value))
    }
}

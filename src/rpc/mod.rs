//! HTTP request/response substrate for remote procedure calls.
//!
//! A service is mounted at a routing path:
//! - `GET <path>`: dial handshake, lists the registered methods
//! - `POST <path>`: `{"method": "Service.Method", "params": ...}` answered by
//!   `{"result": ...}` or `{"error": "..."}`
//!
//! Connections are short-lived: callers dial, make one call and close.

use std::time::Duration;

use serde::{Deserialize, Serialize};

mod client;
mod server;

pub use client::RpcClient;
pub use server::RpcServer;

/// Service name reported by the dial handshake.
pub const HANDSHAKE_SERVICE: &str = "busbridge-rpc";

/// Default time allowed to establish a TCP connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the RPC substrate.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("dialing {address}: {source}")]
    Connection {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("dialing {address}{path}: unexpected status {status}")]
    Handshake {
        address: String,
        path: String,
        status: u16,
    },

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("rpc: can't find method {0}")]
    UnknownMethod(String),
}

/// Outbound call settings.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Time allowed to establish the TCP connection.
    pub connect_timeout: Duration,
    /// Time allowed for a whole request. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
        }
    }
}

impl RpcClientConfig {
    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build an HTTP client applying these timeouts.
    ///
    /// Idle connections are not pooled: every call opens its own connection and
    /// releases it when done.
    pub fn http_client(&self) -> Result<reqwest::Client, RpcError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(0);
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

/// Call envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Reply envelope. Exactly one of `result`/`error` is meaningful.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    fn ok(result: serde_json::Value) -> Self {
        Self {
            result,
            error: None,
        }
    }

    fn err(error: impl ToString) -> Self {
        Self {
            result: serde_json::Value::Null,
            error: Some(error.to_string()),
        }
    }
}

/// Dial handshake reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    pub service: String,
    pub methods: Vec<String>,
}

/// Normalize a routing path so it always starts with `/`.
pub(crate) fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

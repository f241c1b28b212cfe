//! JSON-RPC control surface of the local media player
//!
//! The bridge never interprets control requests: it wraps the desired state
//! in a JSON-RPC 2.0 envelope, hands it to a [`CommandExecutor`] and embeds
//! whatever comes back. [`HttpCommandExecutor`] talks to the player's HTTP
//! endpoint; tests substitute `testing::MockExecutor`.

use async_trait::async_trait;
use thiserror::Error;

pub mod envelope;
pub mod http;

pub use envelope::{ControlRequest, ControlResponse};
pub use http::HttpCommandExecutor;

/// Errors raised while executing a control request
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Transport error talking to device: {0}")]
    Http(String),

    #[error("Device returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Control call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid control response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Executor not configured: {0}")]
    NotConfigured(String),
}

/// Executes a JSON-RPC request against the local device.
///
/// Takes the serialized request and returns the serialized response, which
/// may carry either `result` or `error`. Both are successful calls from the
/// bridge's point of view; `Err` is reserved for failing to get any answer.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: &str) -> Result<String, CommandError>;
}

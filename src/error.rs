//! Error types for the shadow bridge
//!
//! Per-message failures ([`ShadowError`]) are logged and dropped by the
//! handler; service-level failures ([`BridgeError`]) surface from start/stop.
//! Nothing here is fatal to the process.

use crate::config::ConfigError;
use crate::jsonrpc::CommandError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Failures while reconciling a single shadow message
#[derive(Debug, Error)]
pub enum ShadowError {
    #[error("Malformed delta: {reason}")]
    MalformedDelta { reason: String },

    #[error("Control command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Failed to publish reported state to {topic}: {message}")]
    Publish { topic: String, message: String },

    #[error("Shadow update rejected (code {code:?}): {message}")]
    Rejected { code: Option<i64>, message: String },
}

impl ShadowError {
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedDelta {
            reason: reason.into(),
        }
    }

    pub fn publish<T: Into<String>, M: ToString>(topic: T, message: M) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.to_string(),
        }
    }
}

/// Service lifecycle errors
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] MqttError),

    #[error("Command executor error: {0}")]
    Executor(#[from] CommandError),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_constructor() {
        let error = ShadowError::malformed("missing `state`");
        assert!(matches!(error, ShadowError::MalformedDelta { .. }));
        assert_eq!(error.to_string(), "Malformed delta: missing `state`");
    }

    #[test]
    fn test_publish_constructor() {
        let error = ShadowError::publish("things/kodi/shadow/update", "request channel closed");
        assert_eq!(
            error.to_string(),
            "Failed to publish reported state to things/kodi/shadow/update: request channel closed"
        );
    }

    #[test]
    fn test_command_error_converts() {
        let error: ShadowError = CommandError::Timeout { timeout_ms: 500 }.into();
        assert!(matches!(error, ShadowError::Command(_)));
        assert!(error.to_string().contains("500"));
    }

    #[test]
    fn test_rejected_display() {
        let error = ShadowError::Rejected {
            code: Some(400),
            message: "Missing required node: state".to_string(),
        };
        assert!(error.to_string().contains("400"));
        assert!(error.to_string().contains("Missing required node"));
    }

    #[test]
    fn test_bridge_error_from_config() {
        let error: BridgeError = ConfigError::InvalidConfig("bad".to_string()).into();
        assert!(matches!(error, BridgeError::Config(_)));
        assert_eq!(
            error.to_string(),
            "Configuration error: Invalid configuration: bad"
        );
    }
}

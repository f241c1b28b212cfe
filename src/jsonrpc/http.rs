//! JSON-RPC over HTTP executor for the local media player

use super::{CommandError, CommandExecutor};
use crate::config::DeviceSection;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP executor configuration
#[derive(Debug, Clone)]
pub struct HttpExecutorConfig {
    pub url: String,
    pub timeout: Duration,
    pub credentials: Option<(String, String)>,
}

impl HttpExecutorConfig {
    /// Build from the device section, resolving credentials from the environment
    pub fn from_device(device: &DeviceSection) -> Self {
        Self {
            url: device.jsonrpc_url.clone(),
            timeout: device.command_timeout(),
            credentials: device.credentials(),
        }
    }
}

/// Posts JSON-RPC requests to the player's `/jsonrpc` endpoint
pub struct HttpCommandExecutor {
    config: HttpExecutorConfig,
    client: Client,
}

impl HttpCommandExecutor {
    pub fn new(config: HttpExecutorConfig) -> Result<Self, CommandError> {
        if config.url.is_empty() {
            return Err(CommandError::NotConfigured(
                "JSON-RPC endpoint URL is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CommandError::Http(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn from_device(device: &DeviceSection) -> Result<Self, CommandError> {
        Self::new(HttpExecutorConfig::from_device(device))
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl CommandExecutor for HttpCommandExecutor {
    async fn execute(&self, request: &str) -> Result<String, CommandError> {
        debug!(url = %self.config.url, "Executing JSON-RPC request: {}", request);

        let mut builder = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, "application/json")
            .body(request.to_string());

        if let Some((username, password)) = &self.config.credentials {
            builder = builder.basic_auth(username, Some(password));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CommandError::Timeout {
                    timeout_ms: self.config.timeout.as_millis() as u64,
                }
            } else {
                CommandError::Http(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CommandError::Http(e.to_string()))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Device rejected JSON-RPC request");
            return Err(CommandError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!("JSON-RPC response: {}", body);
        Ok(body)
    }
}

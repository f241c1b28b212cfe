//! Bridge configuration
//!
//! Loaded once from a TOML file, validated, then shared read-only by every
//! component for the lifetime of a session. A settings change produces a new
//! value and a full stop/start of the service, never an in-place mutation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Top-level bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    pub broker: BrokerSection,
    pub thing: ThingSection,
    #[serde(default)]
    pub device: DeviceSection,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker host name
    pub host: String,
    /// Broker port (8883 for MQTT over TLS, 443 with ALPN on AWS IoT)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Root CA certificate (PEM)
    pub ca_cert_path: PathBuf,
    /// Client certificate (PEM)
    pub client_cert_path: PathBuf,
    /// Client private key (PEM)
    pub client_key_path: PathBuf,
    /// MQTT client identifier, defaults to the thing name
    pub client_id: Option<String>,
    /// ALPN protocols offered during the TLS handshake
    #[serde(default)]
    pub alpn: Vec<String>,
}

fn default_port() -> u16 {
    8883
}

fn default_keepalive() -> u64 {
    60
}

/// Device shadow identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThingSection {
    /// Thing name as registered with the shadow service
    pub name: String,
    /// Prefix prepended to `things/...`, e.g. `$aws/`
    #[serde(default)]
    pub topic_prefix: String,
}

/// Local media player JSON-RPC endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    #[serde(default = "default_jsonrpc_url")]
    pub jsonrpc_url: String,
    /// Upper bound for a single control call
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Environment variable containing the HTTP username
    pub username_env: Option<String>,
    /// Environment variable containing the HTTP password
    pub password_env: Option<String>,
}

fn default_jsonrpc_url() -> String {
    "http://localhost:8080/jsonrpc".to_string()
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            jsonrpc_url: default_jsonrpc_url(),
            command_timeout_ms: default_command_timeout_ms(),
            username_env: None,
            password_env: None,
        }
    }
}

impl DeviceSection {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Resolve basic-auth credentials from the environment.
    /// A configured username variable that is unset yields no credentials.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self
            .username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())?;
        let password = self
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default();
        Some((username, password))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid thing name: {0}")]
    InvalidThingName(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BridgeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field a session depends on before anything connects
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_thing_name(&self.thing.name)?;

        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be greater than 0".to_string(),
            ));
        }
        if self.broker.keepalive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.keepalive_secs must be at least 1".to_string(),
            ));
        }
        if self.broker.keepalive_secs > u64::from(u16::MAX) {
            return Err(ConfigError::InvalidConfig(format!(
                "broker.keepalive_secs must be at most {}",
                u16::MAX
            )));
        }

        for (field, path) in [
            ("broker.ca_cert_path", &self.broker.ca_cert_path),
            ("broker.client_cert_path", &self.broker.client_cert_path),
            ("broker.client_key_path", &self.broker.client_key_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "{field} must not be empty"
                )));
            }
        }

        if let Some(client_id) = &self.broker.client_id {
            if client_id.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "broker.client_id must not be blank when set".to_string(),
                ));
            }
        }

        if self.thing.topic_prefix.contains(['+', '#']) {
            return Err(ConfigError::InvalidConfig(format!(
                "thing.topic_prefix '{}' must not contain wildcards",
                self.thing.topic_prefix
            )));
        }

        if !self.device.jsonrpc_url.starts_with("http://")
            && !self.device.jsonrpc_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidConfig(format!(
                "device.jsonrpc_url '{}' must be an http(s) URL",
                self.device.jsonrpc_url
            )));
        }
        if self.device.command_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "device.command_timeout_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// MQTT client identifier presented to the broker
    pub fn client_id(&self) -> String {
        self.broker
            .client_id
            .clone()
            .unwrap_or_else(|| self.thing.name.clone())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
host = "broker.example.com"
port = 8883
keepalive_secs = 30
ca_cert_path = "/etc/shadowlink/root-ca.pem"
client_cert_path = "/etc/shadowlink/cert.pem"
client_key_path = "/etc/shadowlink/private.key"

[thing]
name = "living-room"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Thing names follow the shadow service's naming rules
fn validate_thing_name(name: &str) -> Result<(), ConfigError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ':' || c == '_' || c == '-');

    if name.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidThingName(format!(
            "Thing name '{name}' must match pattern [a-zA-Z0-9:_-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[broker]
host = "abc123-ats.iot.eu-west-1.amazonaws.com"
port = 443
keepalive_secs = 30
ca_cert_path = "/certs/AmazonRootCA1.pem"
client_cert_path = "/certs/device.pem.crt"
client_key_path = "/certs/device.pem.key"
client_id = "kodi-livingroom"
alpn = ["x-amzn-mqtt-ca"]

[thing]
name = "kodi"
topic_prefix = "$aws/"

[device]
jsonrpc_url = "http://127.0.0.1:8080/jsonrpc"
command_timeout_ms = 2500
username_env = "KODI_USER"
password_env = "KODI_PASS"
"#;

        let config = BridgeConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.broker.port, 443);
        assert_eq!(config.broker.alpn, vec!["x-amzn-mqtt-ca".to_string()]);
        assert_eq!(config.client_id(), "kodi-livingroom");
        assert_eq!(config.thing.topic_prefix, "$aws/");
        assert_eq!(config.device.command_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = BridgeConfig::test_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.client_id(), "living-room");
        assert_eq!(config.thing.topic_prefix, "");
        assert_eq!(config.device.jsonrpc_url, "http://localhost:8080/jsonrpc");
        assert_eq!(config.device.command_timeout_ms, 10_000);
        assert!(config.broker.alpn.is_empty());
    }

    #[test]
    fn test_invalid_thing_name() {
        assert!(validate_thing_name("bad/thing").is_err());
        assert!(validate_thing_name("").is_err());
        assert!(validate_thing_name("thing+1").is_err());
        assert!(validate_thing_name("kodi_living-room:1").is_ok());
    }

    #[test]
    fn test_zero_keepalive_rejected() {
        let mut config = BridgeConfig::test_config();
        config.broker.keepalive_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_keepalive_must_fit_u16() {
        let mut config = BridgeConfig::test_config();
        config.broker.keepalive_secs = 65_535;
        assert!(config.validate().is_ok());

        config.broker.keepalive_secs = 70_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("keepalive_secs"));
    }

    #[test]
    fn test_empty_credential_path_rejected() {
        let mut config = BridgeConfig::test_config();
        config.broker.client_key_path = PathBuf::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_key_path"));
    }

    #[test]
    fn test_wildcard_prefix_rejected() {
        let mut config = BridgeConfig::test_config();
        config.thing.topic_prefix = "#/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_http_device_url_rejected() {
        let mut config = BridgeConfig::test_config();
        config.device.jsonrpc_url = "tcp://localhost:9090".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_broker_section_fails_to_parse() {
        let result = BridgeConfig::from_toml_str("[thing]\nname = \"kodi\"\n");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_credentials_absent_without_env() {
        let device = DeviceSection {
            username_env: Some("SHADOWLINK_TEST_UNSET_USER_VAR".to_string()),
            ..DeviceSection::default()
        };
        assert!(device.credentials().is_none());
        assert!(DeviceSection::default().credentials().is_none());
    }
}

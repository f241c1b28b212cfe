//! shadowlink - device shadow bridge for a JSON-RPC media player
//!
//! Keeps a cloud device shadow and a local media player in step over MQTT.
//! Desired-state deltas published by shadow clients are executed against the
//! player's JSON-RPC control surface, and the outcome is published back as
//! reported state so the shadow converges.
//!
//! # Overview
//!
//! - [`shadow`] - topics, document types and the delta reconciliation engine
//! - [`transport`] - MQTT v5 session with TLS client auth, resubscribing on
//!   every reconnect
//! - [`jsonrpc`] - the control-call seam and its HTTP implementation
//! - [`service`] - single-consumer worker and settings-driven lifecycle
//!
//! # Quick Start
//!
//! ```rust
//! use shadowlink::shadow::{DeltaEvent, ShadowTopics, ShadowUpdate};
//! use serde_json::json;
//!
//! let topics = ShadowTopics::new("", "living-room");
//! let delta = DeltaEvent::parse(
//!     topics.delta(),
//!     br#"{"state":{"method":"Player.PlayPause","params":{"playerid":1}}}"#,
//! )
//! .unwrap();
//!
//! let update = ShadowUpdate::report(delta.state, json!({"result": {"speed": 1}}));
//! let payload: serde_json::Value = serde_json::from_slice(&update.to_payload().unwrap()).unwrap();
//! assert!(payload["state"]["desired"].is_null());
//! assert_eq!(payload["state"]["reported"]["response"]["result"]["speed"], 1);
//! ```

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod observability;
pub mod service;
pub mod shadow;
pub mod testing;
pub mod transport;

pub use config::{BridgeConfig, ConfigError};
pub use error::{BridgeError, BridgeResult, ShadowError};
pub use jsonrpc::{CommandError, CommandExecutor, HttpCommandExecutor};
pub use service::BridgeService;
pub use shadow::{HandleOutcome, ShadowDeltaHandler, ShadowTopics};
pub use transport::mqtt::MqttClient;

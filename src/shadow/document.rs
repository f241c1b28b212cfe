//! Shadow document types
//!
//! [`DeltaEvent`] is parsed from an inbound delta and dropped once handled;
//! [`ShadowUpdate`] is built fresh for every reconciliation and never stored.

use crate::error::ShadowError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field appended to the reported state carrying the control response
pub const RESPONSE_FIELD: &str = "response";

/// A desired-state delta: the `state` object is a control request body
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEvent {
    pub topic: String,
    pub state: Map<String, Value>,
}

impl DeltaEvent {
    /// Parse a delta payload; other top-level fields (`version`,
    /// `timestamp`, `metadata`) are ignored.
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self, ShadowError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| ShadowError::malformed(format!("invalid JSON: {e}")))?;

        let mut document = match value {
            Value::Object(map) => map,
            _ => return Err(ShadowError::malformed("payload is not a JSON object")),
        };

        match document.remove("state") {
            Some(Value::Object(state)) => Ok(Self {
                topic: topic.to_string(),
                state,
            }),
            Some(_) => Err(ShadowError::malformed("`state` is not a JSON object")),
            None => Err(ShadowError::malformed("missing `state`")),
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.state.get("method").and_then(Value::as_str)
    }
}

/// `{reported, desired}` as published to the update topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDocument {
    pub reported: Value,
    pub desired: Option<Value>,
}

/// Top-level update payload: `{"state": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowUpdate {
    pub state: ShadowDocument,
}

impl ShadowUpdate {
    /// Build the report for a reconciled delta.
    ///
    /// `reported` is the delta's state with `response` added (replacing any
    /// existing `response` key); `desired` is always null, which clears the
    /// pending delta on the shadow service.
    pub fn report(mut state: Map<String, Value>, response: Value) -> Self {
        state.insert(RESPONSE_FIELD.to_string(), response);
        Self {
            state: ShadowDocument {
                reported: Value::Object(state),
                desired: None,
            },
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Error document published on the rejected topic
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RejectedUpdate {
    pub code: Option<i64>,
    pub message: Option<String>,
    #[serde(rename = "clientToken")]
    pub client_token: Option<String>,
}

impl RejectedUpdate {
    pub fn parse(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

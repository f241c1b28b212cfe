//! JSON-RPC 2.0 envelope handling (pure functions)

use super::CommandError;
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";
pub const DEFAULT_REQUEST_ID: u64 = 1;

/// Envelope fields that carry protocol bookkeeping rather than device state
const ENVELOPE_FIELDS: [&str; 2] = ["jsonrpc", "id"];

/// A control request derived from a delta's `state` object
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequest {
    body: Map<String, Value>,
}

impl ControlRequest {
    /// Wrap a desired-state body in a JSON-RPC envelope.
    ///
    /// `method` and `params` come straight from `state`. `jsonrpc` is always
    /// forced to "2.0"; an `id` already present in `state` is kept, otherwise
    /// a fixed id is used so the request depends on nothing but the payload.
    pub fn from_state(state: &Map<String, Value>) -> Self {
        let mut body = state.clone();
        body.insert(
            "jsonrpc".to_string(),
            Value::String(JSONRPC_VERSION.to_string()),
        );
        body.entry("id")
            .or_insert_with(|| Value::from(DEFAULT_REQUEST_ID));
        Self { body }
    }

    pub fn method(&self) -> Option<&str> {
        self.body.get("method").and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&Value> {
        self.body.get("id")
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn to_json(&self) -> Result<String, CommandError> {
        Ok(serde_json::to_string(&self.body)?)
    }
}

/// A control response as returned by the executor
#[derive(Debug, Clone, PartialEq)]
pub struct ControlResponse {
    body: Map<String, Value>,
}

impl ControlResponse {
    /// Parse an executor reply. Anything other than a JSON object is invalid.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| CommandError::InvalidResponse(format!("not JSON: {e}")))?;
        match value {
            Value::Object(body) => Ok(Self { body }),
            other => Err(CommandError::InvalidResponse(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    pub fn is_error(&self) -> bool {
        self.body.contains_key("error")
    }

    /// Drop `jsonrpc` and `id`, leaving `result` or `error` untouched
    pub fn into_device_state(mut self) -> Value {
        for field in ENVELOPE_FIELDS {
            self.body.remove(field);
        }
        Value::Object(self.body)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

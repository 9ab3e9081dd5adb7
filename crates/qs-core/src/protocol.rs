//! Inbound payload classification.
//!
//! Each payload produced by the framer is one of:
//!
//! - `~h~<n>` → [`Inbound::Keepalive`] (must be echoed back verbatim)
//! - a JSON object with `session_id` → [`Inbound::Greeting`]
//! - a JSON object with `"m": "qsd"` → [`Inbound::QuoteDelta`]
//! - anything else → [`Inbound::Ignored`]

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{QsError, Result};

/// Prefix of keepalive payloads.
pub const KEEPALIVE_PREFIX: &str = "~h~";

/// Method name of quote-delta messages.
pub const QUOTE_DELTA_METHOD: &str = "qsd";

/// Status value the server uses to reject a symbol.
pub const STATUS_ERROR: &str = "error";

/// One classified inbound payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound<'a> {
    Keepalive(&'a str),
    Greeting { session_id: String },
    QuoteDelta(QuoteDelta),
    Ignored,
}

/// Body of a `qsd` message: `{"s": status, "n": symbol, "v": {..}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QuoteDelta {
    #[serde(rename = "s")]
    pub status: String,
    #[serde(rename = "n")]
    pub symbol: String,
    #[serde(rename = "v", default)]
    pub values: Map<String, Value>,
}

impl QuoteDelta {
    pub fn is_error(&self) -> bool {
        self.status == STATUS_ERROR
    }
}

/// Classify a single decoded payload.
///
/// Returns [`QsError::ProtocolDecode`] when a payload is shaped like a JSON
/// object but does not parse, or when a `qsd` message lacks its body.
pub fn classify(payload: &str) -> Result<Inbound<'_>> {
    if payload.starts_with(KEEPALIVE_PREFIX) {
        return Ok(Inbound::Keepalive(payload));
    }
    if !(payload.starts_with('{') && payload.ends_with('}')) {
        return Ok(Inbound::Ignored);
    }

    let v: Value =
        serde_json::from_str(payload).map_err(|e| QsError::ProtocolDecode(e.to_string()))?;
    let Value::Object(obj) = v else {
        return Err(QsError::ProtocolDecode("payload is not a JSON object".into()));
    };

    if let Some(id) = obj.get("session_id") {
        let session_id = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(Inbound::Greeting { session_id });
    }

    match obj.get("m").and_then(Value::as_str) {
        Some(QUOTE_DELTA_METHOD) => parse_quote_delta(&obj).map(Inbound::QuoteDelta),
        _ => Ok(Inbound::Ignored),
    }
}

fn parse_quote_delta(obj: &Map<String, Value>) -> Result<QuoteDelta> {
    let body = obj
        .get("p")
        .and_then(Value::as_array)
        .and_then(|p| p.get(1))
        .ok_or_else(|| QsError::ProtocolDecode("qsd message without body".into()))?;

    QuoteDelta::deserialize(body).map_err(|e| QsError::ProtocolDecode(format!("qsd body: {e}")))
}

//! Outbound payload normalization.

use std::sync::Arc;

use serde_json::Value;

/// Data handed to a delivery call.
///
/// Strings are sent as-is; anything else is JSON-serialized. [`Payload::to_frame`]
/// yields a shared frame so fan-out can serialize once and reuse the result
/// for every recipient.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Already-serialized text, passed through untouched.
    Text(Arc<String>),
    /// Structured value, serialized on first use.
    Json(Value),
}

impl Payload {
    /// Normalize into the text frame that goes on the wire.
    pub fn to_frame(&self) -> Result<Arc<String>, serde_json::Error> {
        match self {
            Self::Text(text) => Ok(Arc::clone(text)),
            Self::Json(Value::String(s)) => Ok(Arc::new(s.clone())),
            Self::Json(value) => serde_json::to_string(value).map(Arc::new),
        }
    }

    /// Normalize once and return a `Text` payload that clones cheaply.
    pub fn into_shared(self) -> Result<Self, serde_json::Error> {
        match self {
            Self::Text(_) => Ok(self),
            other => other.to_frame().map(Self::Text),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(Arc::new(s.to_owned()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(Arc::new(s))
    }
}

impl From<Arc<String>> for Payload {
    fn from(s: Arc<String>) -> Self {
        Self::Text(s)
    }
}

impl From<Value> for Payload {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

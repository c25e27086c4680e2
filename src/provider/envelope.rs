//! Uniform result envelope returned for every tool call.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Provenance of a tool result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub script: String,
    /// Physical function that served the call.
    pub function: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub as_of: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Set to `"hit"` when the result was replayed from the response cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
}

impl ToolMeta {
    pub fn new(provider: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            function: function.into(),
            as_of: now_iso(),
            ..Default::default()
        }
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = script.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed_seconds = Some(round3(seconds));
        self
    }
}

/// `{meta, data, warnings, errors}` around one tool's result.
///
/// A non-empty `errors` means `data` is null or partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub meta: ToolMeta,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ToolResult {
    pub fn ok(meta: ToolMeta, data: Value) -> Self {
        Self {
            meta,
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn failed(meta: ToolMeta, data: Value, error: impl Into<String>) -> Self {
        Self {
            meta,
            data,
            warnings: Vec::new(),
            errors: vec![error.into()],
        }
    }

    /// Envelope for a call that never produced a result at all.
    pub fn exception(function: &str, error: impl Into<String>) -> Self {
        Self::failed(
            ToolMeta {
                function: function.to_string(),
                ..Default::default()
            },
            Value::Null,
            error,
        )
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Local time, second precision, the format every `as_of` uses.
pub fn now_iso() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

//! Tool registry: manifest-loaded descriptors of named data operations.
//!
//! Owns tool *metadata* only. Execution lives in the provider.

use super::params::ParamSchema;
use crate::types::{Error, Result, Secrets};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

// =============================================================================
// Tool descriptor
// =============================================================================

/// A single manifest entry.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// The raw `parameters` object as it appears in the manifest.
    pub raw_parameters: Value,
    pub parameters: ParamSchema,
    /// `extra.output`, when the manifest documents it.
    pub output: Option<Value>,
}

impl ToolDescriptor {
    fn from_manifest_item(item: &Value) -> Option<Self> {
        let function = item.get("function")?.as_object()?;
        let name = function.get("name")?.as_str()?;
        if name.is_empty() {
            return None;
        }
        let raw_parameters = function
            .get("parameters")
            .filter(|p| p.is_object())
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        Some(Self {
            name: name.to_string(),
            description: function
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            parameters: ParamSchema::from_value(&raw_parameters),
            raw_parameters,
            output: item.get("extra").and_then(|e| e.get("output")).cloned(),
        })
    }
}

// =============================================================================
// Tool registry
// =============================================================================

/// Immutable name → descriptor index.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    entries: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    /// Load the manifest from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read tool manifest {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Parse a manifest: a JSON array of `{function: {...}, extra: {...}}`.
    ///
    /// Items without a usable `function.name` are skipped; an index that ends
    /// up empty is a config error.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| Error::config(format!("tool manifest is not valid JSON: {}", e)))?;
        let Value::Array(items) = raw else {
            return Err(Error::config("tools json must be a list"));
        };

        let mut entries = HashMap::with_capacity(items.len());
        for descriptor in items.iter().filter_map(ToolDescriptor::from_manifest_item) {
            entries.insert(descriptor.name.clone(), descriptor);
        }

        if entries.is_empty() {
            return Err(Error::config("tool registry is empty"));
        }
        tracing::debug!(tools = entries.len(), "tool_registry_loaded");
        Ok(Self { entries })
    }

    /// Pure lookup.
    pub fn describe(&self, name: &str) -> Option<&ToolDescriptor> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptors sorted by name.
    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        let mut entries: Vec<&ToolDescriptor> = self.entries.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Validate and coerce arguments for a registered tool.
    pub fn validate_and_convert(
        &self,
        name: &str,
        args: &Map<String, Value>,
        secrets: &Secrets,
    ) -> Result<Map<String, Value>> {
        let descriptor = self
            .entries
            .get(name)
            .ok_or_else(|| Error::not_found(format!("Unknown tool: {}", name)))?;
        descriptor.parameters.validate_and_convert(args, secrets)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Declarative JSON view files.
//!
//! ```json
//! {
//!   "view_name": "hist_pair_cn",
//!   "description": "两只股票日线对比",
//!   "params_schema": {"type": "object", "properties": {
//!       "a": {"type": "string"}, "b": {"type": "string"},
//!       "start_date": {"type": "string", "default": "20240101"}}},
//!   "steps": [
//!     {"key": "{{a}}", "tool": "stock_zh_a_hist", "args": {"symbol": "{{a}}", "start_date": "{{start_date}}"}},
//!     {"key": "{{b}}", "tool": "stock_zh_a_hist", "args": {"symbol": "{{b}}", "start_date": "{{start_date}}"}}
//!   ]
//! }
//! ```
//!
//! A string that is exactly one `{{param}}` is replaced by the param value
//! with its JSON type intact; placeholders embedded in longer strings are
//! interpolated as text. Missing params fall back to the schema `default`,
//! then to null.

use super::{empty_params_schema, PlanStep, ViewPlanner, ViewSpec};
use crate::types::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonViewDef {
    pub view_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_params_schema")]
    pub params_schema: Value,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl JsonViewDef {
    pub fn into_spec(self) -> Result<ViewSpec> {
        if self.view_name.trim().is_empty() {
            return Err(Error::config("view file has an empty view_name"));
        }
        let planner = TemplatePlanner::new(self.steps, &self.params_schema);
        ViewSpec::custom(self.view_name, self.description, self.params_schema, Arc::new(planner))
    }
}

/// Plans by substituting params into fixed step templates.
#[derive(Debug, Clone)]
pub struct TemplatePlanner {
    steps: Vec<PlanStep>,
    defaults: Map<String, Value>,
}

impl TemplatePlanner {
    pub fn new(steps: Vec<PlanStep>, params_schema: &Value) -> Self {
        let defaults = params_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|(name, prop)| {
                        prop.get("default").map(|d| (name.clone(), d.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { steps, defaults }
    }

    fn lookup(&self, params: &Map<String, Value>, name: &str) -> Value {
        match params.get(name) {
            Some(v) if !v.is_null() => v.clone(),
            _ => self.defaults.get(name).cloned().unwrap_or(Value::Null),
        }
    }

    fn render_str(&self, params: &Map<String, Value>, template: &str) -> Value {
        if let Some(name) = whole_placeholder(template) {
            return self.lookup(params, name);
        }
        Value::String(self.interpolate(params, template))
    }

    fn interpolate(&self, params: &Map<String, Value>, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            out.push_str(&rest[..start]);
            let name = rest[start + 2..start + 2 + len].trim();
            match self.lookup(params, name) {
                Value::Null => {}
                Value::String(s) => out.push_str(&s),
                other => out.push_str(&other.to_string()),
            }
            rest = &rest[start + 2 + len + 2..];
        }
        out.push_str(rest);
        out
    }

    fn render(&self, params: &Map<String, Value>, value: &Value) -> Value {
        match value {
            Value::String(s) => self.render_str(params, s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.render(params, v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render(params, v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

impl ViewPlanner for TemplatePlanner {
    fn plan(&self, params: &Map<String, Value>) -> Result<Vec<PlanStep>> {
        Ok(self
            .steps
            .iter()
            .map(|step| PlanStep {
                key: step
                    .key
                    .as_deref()
                    .map(|k| self.interpolate(params, k)),
                tool: self.interpolate(params, &step.tool),
                args: self.render(params, &step.args),
            })
            .collect())
    }
}

/// Loads every `*.json` file in `dir`, in file-name order.
pub fn load_json_views(dir: &Path) -> Result<Vec<ViewSpec>> {
    if !dir.is_dir() {
        return Err(Error::config(format!("views dir not found: {}", dir.display())));
    }
    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut specs = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = std::fs::read_to_string(&path)?;
        let def: JsonViewDef = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("invalid view file {}: {}", path.display(), e)))?;
        specs.push(def.into_spec()?);
    }
    tracing::debug!(count = specs.len(), dir = %dir.display(), "json_views_loaded");
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn planner() -> TemplatePlanner {
        let steps = vec![
            PlanStep::new(
                "hist_{{symbol}}",
                "stock_zh_a_hist",
                json!({"symbol": "{{symbol}}", "start_date": "{{start}}", "adjust": "", "n": "{{limit}}"}),
            ),
            PlanStep {
                key: None,
                tool: "stock_info_a_code_name".into(),
                args: json!({}),
            },
        ];
        let schema = json!({"type": "object", "properties": {
            "symbol": {"type": "string"},
            "start": {"type": "string", "default": "20240101"},
            "limit": {"type": "integer"}
        }});
        TemplatePlanner::new(steps, &schema)
    }

    #[test]
    fn test_substitutes_params_and_defaults() {
        let params = json!({"symbol": "600000", "limit": 5});
        let plan = planner().plan(params.as_object().unwrap()).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].key.as_deref(), Some("hist_600000"));
        assert_eq!(plan[0].args["symbol"], "600000");
        assert_eq!(plan[0].args["start_date"], "20240101");
        assert_eq!(plan[0].args["adjust"], "");
        // whole-string placeholders keep the JSON type
        assert_eq!(plan[0].args["n"], 5);
        assert_eq!(plan[1].result_key(), "stock_info_a_code_name");
    }

    #[test]
    fn test_missing_param_becomes_null() {
        let plan = planner().plan(&Map::new()).unwrap();
        assert_eq!(plan[0].args["symbol"], Value::Null);
        assert_eq!(plan[0].key.as_deref(), Some("hist_"));
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        let p = TemplatePlanner::new(vec![], &json!({}));
        assert_eq!(p.interpolate(&Map::new(), "a{{b"), "a{{b");
    }

    #[test]
    fn test_load_json_views() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            json!({"view_name": "b_view", "steps": [{"tool": "x"}]}).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            json!({"view_name": "a_view", "description": "A"}).to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let specs = load_json_views(dir.path()).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a_view", "b_view"]);
        assert_eq!(specs[0].params_schema, empty_params_schema());
    }

    #[test]
    fn test_bad_view_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{\"description\": 1}").unwrap();
        assert!(matches!(load_json_views(dir.path()), Err(Error::Config(_))));
        assert!(matches!(
            load_json_views(&dir.path().join("missing")),
            Err(Error::Config(_))
        ));
    }
}

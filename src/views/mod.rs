//! View composition: tool views (1:1 passthrough) and custom views
//! (declarative multi-call plans).

pub mod builtin;
pub mod runner;
pub mod template;

pub use runner::{run_view, ViewMeta, ViewResult};
pub use template::{JsonViewDef, TemplatePlanner};

use crate::tools::ToolRegistry;
use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Plan steps
// =============================================================================

/// One call in a custom view's plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Result key; defaults to the tool name.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub tool: String,
    /// Must be an object; anything else is reported and replaced by `{}`.
    #[serde(default = "empty_object")]
    pub args: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl PlanStep {
    pub fn new(key: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            key: Some(key.into()),
            tool: tool.into(),
            args,
        }
    }

    pub fn result_key(&self) -> String {
        match &self.key {
            Some(k) if !k.is_empty() => k.clone(),
            _ if !self.tool.is_empty() => self.tool.clone(),
            _ => "result".to_string(),
        }
    }
}

/// Builds a plan from caller params. Steps must not depend on each other.
pub trait ViewPlanner: Send + Sync {
    fn plan(&self, params: &Map<String, Value>) -> Result<Vec<PlanStep>>;
}

// =============================================================================
// View spec
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    ToolView,
    CustomView,
}

#[derive(Clone)]
pub struct ViewSpec {
    pub name: String,
    pub kind: ViewKind,
    pub description: String,
    pub params_schema: Value,
    pub planner: Option<Arc<dyn ViewPlanner>>,
    validator: Option<Arc<jsonschema::Validator>>,
}

impl std::fmt::Debug for ViewSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("has_planner", &self.planner.is_some())
            .finish_non_exhaustive()
    }
}

pub fn empty_params_schema() -> Value {
    json!({"type": "object", "properties": {}, "required": []})
}

impl ViewSpec {
    pub fn tool_view(name: impl Into<String>, description: impl Into<String>, params_schema: Value) -> Self {
        Self {
            name: name.into(),
            kind: ViewKind::ToolView,
            description: description.into(),
            params_schema,
            planner: None,
            validator: None,
        }
    }

    /// A custom view. The params schema must compile as a JSON schema.
    pub fn custom(
        name: impl Into<String>,
        description: impl Into<String>,
        params_schema: Value,
        planner: Arc<dyn ViewPlanner>,
    ) -> Result<Self> {
        let name = name.into();
        let params_schema = if params_schema.is_object() {
            params_schema
        } else {
            empty_params_schema()
        };
        let validator = jsonschema::validator_for(&params_schema).map_err(|e| {
            Error::config(format!("invalid params_schema for view {}: {}", name, e))
        })?;
        Ok(Self {
            name,
            kind: ViewKind::CustomView,
            description: description.into(),
            params_schema,
            planner: Some(planner),
            validator: Some(Arc::new(validator)),
        })
    }

    /// Messages for params that do not satisfy the schema. Advisory only.
    pub fn schema_warnings(&self, params: &Map<String, Value>) -> Vec<String> {
        let Some(validator) = &self.validator else {
            return Vec::new();
        };
        let instance = Value::Object(params.clone());
        validator
            .iter_errors(&instance)
            .map(|e| format!("params do not match schema: {}", e))
            .collect()
    }

    /// `{name, kind, description, params_schema}`.
    pub fn descriptor(&self) -> Value {
        json!({
            "name": self.name,
            "kind": self.kind,
            "description": self.description,
            "params_schema": self.params_schema,
        })
    }
}

// =============================================================================
// Catalogue
// =============================================================================

/// Every view the service exposes, keyed by name.
#[derive(Debug, Default)]
pub struct ViewCatalog {
    views: BTreeMap<String, ViewSpec>,
}

impl ViewCatalog {
    /// Registry tools become tool views; custom views override same-named ones.
    pub fn build(registry: &ToolRegistry, custom: Vec<ViewSpec>) -> Self {
        let mut views = BTreeMap::new();
        for tool in registry.descriptors() {
            views.insert(
                tool.name.clone(),
                ViewSpec::tool_view(&tool.name, &tool.description, tool.raw_parameters.clone()),
            );
        }
        for spec in custom {
            views.insert(spec.name.clone(), spec);
        }
        Self { views }
    }

    pub fn get(&self, name: &str) -> Option<&ViewSpec> {
        self.views.get(name)
    }

    /// Sorted view names.
    pub fn names(&self) -> Vec<String> {
        self.views.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

/// Built-in custom views plus JSON view files, rejecting duplicate names.
pub fn discover_custom_views(views_dir: Option<&Path>) -> Result<Vec<ViewSpec>> {
    let mut specs = builtin::builtin_views()?;
    if let Some(dir) = views_dir {
        specs.extend(template::load_json_views(dir)?);
    }

    let mut seen = std::collections::HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(Error::config(format!("Duplicate view name: {:?}", spec.name)));
        }
    }
    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<PlanStep>);

    impl ViewPlanner for Fixed {
        fn plan(&self, _params: &Map<String, Value>) -> Result<Vec<PlanStep>> {
            Ok(self.0.clone())
        }
    }

    const MANIFEST: &str = r#"[
        {"function": {"name": "stock_zh_a_hist", "description": "日线",
            "parameters": {"properties": {"symbol": {"type": "string"}}, "required": ["symbol"]}}},
        {"function": {"name": "stock_info_a_code_name"}}
    ]"#;

    #[test]
    fn test_result_key_defaults() {
        assert_eq!(PlanStep::new("k", "t", json!({})).result_key(), "k");
        let step: PlanStep = serde_json::from_value(json!({"tool": "t"})).unwrap();
        assert_eq!(step.result_key(), "t");
        assert_eq!(step.args, json!({}));
        let step: PlanStep = serde_json::from_value(json!({})).unwrap();
        assert_eq!(step.result_key(), "result");
    }

    #[test]
    fn test_catalog_merges_and_overrides() {
        let registry = ToolRegistry::from_json(MANIFEST).unwrap();
        let custom = ViewSpec::custom(
            "stock_info_a_code_name",
            "override",
            json!({"type": "object"}),
            Arc::new(Fixed(vec![])),
        )
        .unwrap();
        let catalog = ViewCatalog::build(&registry, vec![custom]);
        assert_eq!(catalog.names(), vec!["stock_info_a_code_name", "stock_zh_a_hist"]);
        assert_eq!(
            catalog.get("stock_info_a_code_name").unwrap().kind,
            ViewKind::CustomView
        );
        let hist = catalog.get("stock_zh_a_hist").unwrap();
        assert_eq!(hist.descriptor()["kind"], "tool_view");
        assert_eq!(hist.descriptor()["params_schema"]["required"], json!(["symbol"]));
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let err = ViewSpec::custom(
            "bad",
            "",
            json!({"type": "not-a-type"}),
            Arc::new(Fixed(vec![])),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_schema_warnings() {
        let spec = ViewSpec::custom(
            "v",
            "",
            json!({"type": "object", "properties": {"symbol": {"type": "string"}}, "required": ["symbol"]}),
            Arc::new(Fixed(vec![])),
        )
        .unwrap();
        assert!(spec.schema_warnings(&Map::new())[0].contains("params do not match schema"));
        let ok = json!({"symbol": "000001"});
        assert!(spec.schema_warnings(ok.as_object().unwrap()).is_empty());
    }

    #[test]
    fn test_builtins_have_unique_names() {
        let specs = discover_custom_views(None).unwrap();
        assert!(!specs.is_empty());
        assert!(specs.iter().all(|s| s.kind == ViewKind::CustomView));
    }

    #[test]
    fn test_duplicate_json_view_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let name = &builtin::builtin_views().unwrap()[0].name;
        std::fs::write(
            dir.path().join("dup.json"),
            json!({"view_name": name, "steps": []}).to_string(),
        )
        .unwrap();
        let err = discover_custom_views(Some(dir.path())).unwrap_err();
        assert!(err.to_string().contains("Duplicate view name"));
    }
}

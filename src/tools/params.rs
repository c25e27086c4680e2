//! Parameter schemas and argument coercion.
//!
//! Schemas stay plain data loaded from the manifest; each declared JSON type
//! maps to a [`ParamKind`] with one explicit coercion function.

use crate::types::{Error, Result, Secrets};
use serde_json::{Map, Value};

// =============================================================================
// Parameter kinds
// =============================================================================

/// Declared kind of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Declared with a type this service does not coerce; passed through.
    Any,
}

impl ParamKind {
    /// Resolve the JSON-schema `type` keyword. Untyped properties are strings.
    pub fn from_schema_type(type_value: Option<&Value>) -> Self {
        let name = match type_value {
            None | Some(Value::Null) => return ParamKind::String,
            Some(Value::String(s)) => s.as_str(),
            // ["integer", "null"] style unions: first non-null member wins
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .find(|s| *s != "null")
                .unwrap_or("string"),
            Some(_) => return ParamKind::Any,
        };
        match name {
            "string" => ParamKind::String,
            "integer" => ParamKind::Integer,
            "number" => ParamKind::Number,
            "boolean" => ParamKind::Boolean,
            "array" => ParamKind::Array,
            "object" => ParamKind::Object,
            _ => ParamKind::Any,
        }
    }

    /// Human-readable type name for messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
            ParamKind::Any => "any",
        }
    }

    /// Coerce a non-null JSON value into this kind.
    pub fn coerce(&self, value: &Value) -> std::result::Result<Value, String> {
        match self {
            ParamKind::String => Ok(Value::String(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })),
            ParamKind::Integer => coerce_integer(value),
            ParamKind::Number => coerce_number(value),
            ParamKind::Boolean => coerce_bool(value).map(Value::Bool),
            ParamKind::Array => coerce_array(value),
            ParamKind::Object => coerce_object(value),
            ParamKind::Any => Ok(value.clone()),
        }
    }
}

fn coerce_integer(value: &Value) -> std::result::Result<Value, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::from(i))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::from(u))
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                float_to_int(f).ok_or_else(|| format!("{} is not an integer", n))
            }
        }
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(Value::from(i));
            }
            match s.parse::<f64>() {
                Ok(f) if f.fract() == 0.0 => {
                    float_to_int(f).ok_or_else(|| format!("invalid literal for integer: {:?}", s))
                }
                _ => Err(format!("invalid literal for integer: {:?}", s)),
            }
        }
        other => Err(format!("cannot convert {} to integer", value_type_name(other))),
    }
}

fn float_to_int(f: f64) -> Option<Value> {
    if f.is_finite() && f.abs() < 9.0e15 {
        Some(Value::from(f.trunc() as i64))
    } else {
        None
    }
}

fn coerce_number(value: &Value) -> std::result::Result<Value, String> {
    let f = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match f {
        Some(f) if f.is_finite() => Ok(Value::from(f)),
        _ => Err(format!("cannot convert {} to number", value)),
    }
}

/// Truthy/falsy parsing shared with CLI flags and params.
pub fn coerce_bool(value: &Value) -> std::result::Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Ok(true),
            "false" | "0" | "no" | "n" => Ok(false),
            _ => Err(format!("Cannot convert to boolean: {:?}", s)),
        },
        other => Err(format!("Cannot convert to boolean: {}", other)),
    }
}

fn coerce_array(value: &Value) -> std::result::Result<Value, String> {
    match value {
        Value::Array(_) => Ok(value.clone()),
        Value::String(s) => {
            let s = s.trim();
            if s.starts_with('[') {
                match serde_json::from_str::<Value>(s) {
                    Ok(parsed @ Value::Array(_)) => Ok(parsed),
                    Ok(_) => Err("JSON text is not an array".to_string()),
                    Err(e) => Err(e.to_string()),
                }
            } else {
                Ok(Value::Array(
                    s.split(',')
                        .filter(|part| !part.is_empty())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                ))
            }
        }
        other => Err(format!("cannot convert {} to array", value_type_name(other))),
    }
}

fn coerce_object(value: &Value) -> std::result::Result<Value, String> {
    match value {
        Value::Object(_) => Ok(value.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
            Ok(parsed @ Value::Object(_)) => Ok(parsed),
            Ok(_) => Err("JSON text is not an object".to_string()),
            Err(e) => Err(e.to_string()),
        },
        other => Err(format!("cannot convert {} to object", value_type_name(other))),
    }
}

pub(crate) fn value_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Parameter schema
// =============================================================================

/// One declared property of a tool's parameter object.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub kind: ParamKind,
    pub description: String,
    pub enum_values: Option<Vec<Value>>,
}

impl PropertySchema {
    fn from_value(value: &Value) -> Self {
        Self {
            kind: ParamKind::from_schema_type(value.get("type")),
            description: value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            enum_values: value.get("enum").and_then(Value::as_array).cloned(),
        }
    }

    /// Timeouts, tokens and params documented with a "none" default may be
    /// omitted even when the manifest marks them required.
    fn is_pseudo_optional(name: &str, schema: Option<&PropertySchema>) -> bool {
        if matches!(name, "timeout" | "token") {
            return true;
        }
        let Some(schema) = schema else {
            return false;
        };
        let desc = schema.description.to_lowercase();
        desc.contains("none") || (desc.contains("默认") && desc.contains("不设置"))
    }
}

/// Parsed `parameters` object of a tool descriptor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    pub properties: Map<String, Value>,
    parsed: Vec<(String, PropertySchema)>,
    pub required: Vec<String>,
}

impl ParamSchema {
    /// Parse a JSON-schema object. Missing pieces default to empty.
    pub fn from_value(value: &Value) -> Self {
        let properties = value
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let parsed = properties
            .iter()
            .map(|(name, schema)| (name.clone(), PropertySchema::from_value(schema)))
            .collect();
        let required = value
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            properties,
            parsed,
            required,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.parsed
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, schema)| schema)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Validate and coerce caller arguments. Never performs I/O.
    ///
    /// Fails with [`Error::Validation`] naming the offending field.
    pub fn validate_and_convert(
        &self,
        args: &Map<String, Value>,
        secrets: &Secrets,
    ) -> Result<Map<String, Value>> {
        let mut arguments = args.clone();

        if self.declares("token") && arguments.get("token").map_or(true, Value::is_null) {
            if let Some(token) = &secrets.xueqiu_token {
                arguments.insert("token".to_string(), Value::String(token.clone()));
            }
        }

        for name in &self.required {
            if arguments.get(name).is_some_and(|v| !v.is_null()) {
                continue;
            }
            if PropertySchema::is_pseudo_optional(name, self.property(name)) {
                arguments.insert(name.clone(), Value::Null);
                continue;
            }
            return Err(Error::validation(format!(
                "Missing required parameter: {}",
                name
            )));
        }

        let mut converted = Map::with_capacity(arguments.len());
        for (name, value) in arguments {
            if value.is_null() || is_placeholder(&value) {
                converted.insert(name, Value::Null);
                continue;
            }

            let schema = self.property(&name);
            let kind = schema.map_or(ParamKind::String, |s| s.kind);
            let coerced = kind.coerce(&value).map_err(|e| {
                Error::validation(format!(
                    "Failed to convert parameter {} to {}: {}",
                    name,
                    kind.display_name(),
                    e
                ))
            })?;

            if let Some(allowed) = schema.and_then(|s| s.enum_values.as_ref()) {
                if !allowed.contains(&coerced) {
                    return Err(Error::validation(format!(
                        "Invalid value for {}: {}; allowed: {}",
                        name,
                        coerced,
                        Value::Array(allowed.clone())
                    )));
                }
            }

            converted.insert(name, coerced);
        }

        Ok(converted)
    }
}

/// Callers sometimes echo the placeholder names instead of leaving a value unset.
fn is_placeholder(value: &Value) -> bool {
    value.as_str().is_some_and(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "timeout" | "token" | "none" | "null"
        )
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> ParamSchema {
        ParamSchema::from_value(&json!({
            "properties": {
                "symbol": {"type": "string", "description": "股票代码"},
                "period": {"type": "string", "enum": ["daily", "weekly", "monthly"]},
                "limit": {"type": "integer"},
                "ratio": {"type": "number"},
                "adjusted": {"type": "boolean"},
                "symbols": {"type": "array"},
                "filters": {"type": "object"},
                "timeout": {"type": "number"},
                "token": {"type": "string"},
                "start_date": {"type": "string", "description": "开始日期, 默认 None"}
            },
            "required": ["symbol", "timeout", "start_date"]
        }))
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_required_named() {
        let err = schema()
            .validate_and_convert(&args(json!({"period": "daily"})), &Secrets::default())
            .unwrap_err();
        assert!(err.to_string().contains("Missing required parameter: symbol"));
    }

    #[test]
    fn test_pseudo_optional_filled_with_null() {
        let out = schema()
            .validate_and_convert(&args(json!({"symbol": "000001"})), &Secrets::default())
            .unwrap();
        assert_eq!(out["timeout"], Value::Null);
        assert_eq!(out["start_date"], Value::Null);
        assert_eq!(out["symbol"], "000001");
    }

    #[test]
    fn test_token_autofilled_from_secrets() {
        let secrets = Secrets {
            xueqiu_token: Some("tok".to_string()),
        };
        let out = schema()
            .validate_and_convert(&args(json!({"symbol": "1"})), &secrets)
            .unwrap();
        assert_eq!(out["token"], "tok");
    }

    #[test]
    fn test_enum_rejected() {
        let err = schema()
            .validate_and_convert(
                &args(json!({"symbol": "1", "period": "hourly"})),
                &Secrets::default(),
            )
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid value for period"), "{}", msg);
        assert!(msg.contains("daily"));
    }

    #[test]
    fn test_bad_type_rejected() {
        let err = schema()
            .validate_and_convert(
                &args(json!({"symbol": "1", "limit": "ten"})),
                &Secrets::default(),
            )
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("Failed to convert parameter limit to integer"));
    }

    #[test]
    fn test_coercions() {
        let out = schema()
            .validate_and_convert(
                &args(json!({
                    "symbol": 600000,
                    "limit": "12",
                    "ratio": "0.5",
                    "adjusted": "yes",
                    "symbols": "a,b,,c",
                    "filters": "{\"k\": 1}"
                })),
                &Secrets::default(),
            )
            .unwrap();
        assert_eq!(out["symbol"], "600000");
        assert_eq!(out["limit"], 12);
        assert_eq!(out["ratio"], 0.5);
        assert_eq!(out["adjusted"], true);
        assert_eq!(out["symbols"], json!(["a", "b", "c"]));
        assert_eq!(out["filters"], json!({"k": 1}));
    }

    #[test]
    fn test_array_from_json_text() {
        let v = ParamKind::Array.coerce(&json!("[1, 2]")).unwrap();
        assert_eq!(v, json!([1, 2]));
        assert!(ParamKind::Array.coerce(&json!("[1,")).is_err());
        assert!(ParamKind::Array.coerce(&json!(5)).is_err());
    }

    #[test]
    fn test_placeholders_become_null() {
        let out = schema()
            .validate_and_convert(
                &args(json!({"symbol": "1", "limit": "None"})),
                &Secrets::default(),
            )
            .unwrap();
        assert_eq!(out["limit"], Value::Null);
    }

    #[test]
    fn test_undeclared_args_pass_through_as_strings() {
        let out = schema()
            .validate_and_convert(&args(json!({"symbol": "1", "extra": 3})), &Secrets::default())
            .unwrap();
        assert_eq!(out["extra"], "3");
    }

    #[test]
    fn test_schema_type_unions() {
        assert_eq!(
            ParamKind::from_schema_type(Some(&json!(["integer", "null"]))),
            ParamKind::Integer
        );
        assert_eq!(ParamKind::from_schema_type(None), ParamKind::String);
        assert_eq!(
            ParamKind::from_schema_type(Some(&json!("date"))),
            ParamKind::Any
        );
    }

    proptest! {
        #[test]
        fn prop_integer_strings_round_trip(n in -1_000_000_000i64..1_000_000_000i64) {
            let v = ParamKind::Integer.coerce(&Value::String(n.to_string())).unwrap();
            prop_assert_eq!(v, Value::from(n));
        }

        #[test]
        fn prop_bool_words_never_panic(s in "\\PC{0,8}") {
            let _ = coerce_bool(&Value::String(s));
        }

        #[test]
        fn prop_comma_lists_drop_empty_parts(parts in proptest::collection::vec("[a-z]{0,3}", 0..6)) {
            let joined = parts.join(",");
            let v = ParamKind::Array.coerce(&Value::String(joined)).unwrap();
            let expected: Vec<Value> = parts
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| Value::String(p.clone()))
                .collect();
            prop_assert_eq!(v, Value::Array(expected));
        }
    }
}

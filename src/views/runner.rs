//! View execution with partial-failure semantics.
//!
//! A failing step never aborts its siblings: its envelope still lands under
//! its key and its errors are appended to the view's `errors` prefixed with
//! the tool name.

use super::{PlanStep, ViewKind, ViewSpec};
use crate::provider::envelope::{now_iso, round3};
use crate::provider::{CallOptions, ToolProvider, ToolResult};
use crate::recovery::with_recovery;
use crate::types::RunId;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewMeta {
    pub layer: String,
    pub view: String,
    pub run_id: RunId,
    pub as_of: String,
    pub elapsed_seconds: f64,
    pub params: Map<String, Value>,
}

/// Aggregated result of one view run: one envelope per plan key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewResult {
    pub meta: ViewMeta,
    pub data: Map<String, Value>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ViewResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

struct StepOutcome {
    entry: Option<(String, Value)>,
    errors: Vec<String>,
}

/// Run a view. Never fails; every problem is reported in `errors`.
///
/// Custom-view steps run up to `parallelism` at a time and are collected in
/// plan order.
pub async fn run_view(
    spec: &ViewSpec,
    params: &Map<String, Value>,
    provider: &dyn ToolProvider,
    refresh: bool,
    parallelism: usize,
) -> ViewResult {
    let started = Instant::now();
    let run_id = RunId::new();
    let options = CallOptions {
        refresh,
        script: format!("view:{}", spec.name),
    };

    let mut data = Map::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    match spec.kind {
        ViewKind::ToolView => match provider.call_tool(&spec.name, params, &options).await {
            Ok(res) => {
                errors.extend(res.errors.iter().cloned());
                data.insert(spec.name.clone(), res.to_value());
            }
            Err(e) => {
                let msg = e.to_string();
                data.insert(spec.name.clone(), ToolResult::exception(&spec.name, &msg).to_value());
                errors.push(msg);
            }
        },
        ViewKind::CustomView => match &spec.planner {
            None => errors.push(format!("Invalid custom view module for {}", spec.name)),
            Some(planner) => {
                warnings.extend(spec.schema_warnings(params));

                let plan = match with_recovery(
                    || planner.plan(params),
                    &format!("view_plan:{}", spec.name),
                ) {
                    Ok(plan) => plan,
                    Err(e) => {
                        errors.push(format!("Failed to build view plan: {}", e));
                        Vec::new()
                    }
                };

                let outcomes: Vec<StepOutcome> = stream::iter(
                    plan.into_iter()
                        .map(|step| run_step(&spec.name, step, provider, &options)),
                )
                .buffered(parallelism.max(1))
                .collect()
                .await;

                for outcome in outcomes {
                    if let Some((key, envelope)) = outcome.entry {
                        data.insert(key, envelope);
                    }
                    errors.extend(outcome.errors);
                }
            }
        },
    }

    ViewResult {
        meta: ViewMeta {
            layer: "views".to_string(),
            view: spec.name.clone(),
            run_id,
            as_of: now_iso(),
            elapsed_seconds: round3(started.elapsed().as_secs_f64()),
            params: params.clone(),
        },
        data,
        warnings,
        errors,
    }
}

async fn run_step(
    view: &str,
    step: PlanStep,
    provider: &dyn ToolProvider,
    options: &CallOptions,
) -> StepOutcome {
    let mut errors = Vec::new();
    if step.tool.is_empty() {
        let shown = serde_json::to_string(&step).unwrap_or_default();
        return StepOutcome {
            entry: None,
            errors: vec![format!("Invalid plan item (missing tool): {}", shown)],
        };
    }

    let key = step.result_key();
    let args = match step.args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => {
            errors.push(format!("Invalid plan item args for {}: must be an object", step.tool));
            Map::new()
        }
    };

    let envelope = match provider.call_tool(&step.tool, &args, options).await {
        Ok(res) => {
            errors.extend(res.errors.iter().map(|e| format!("{}: {}", step.tool, e)));
            res
        }
        Err(e) => {
            let msg = e.to_string();
            errors.push(format!("{}: {}", step.tool, msg));
            ToolResult::exception(&step.tool, msg)
        }
    };
    if !envelope.is_ok() {
        tracing::warn!(view, key = %key, tool = %step.tool, error = %envelope.errors.join("; "), "view_step_failed");
    }

    StepOutcome {
        entry: Some((key, envelope.to_value())),
        errors,
    }
}

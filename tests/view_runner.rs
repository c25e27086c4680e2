//! View Runner Integration Tests
//!
//! Views run end to end through the real data provider over fake backends.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use view_service::health::{HealthMonitor, HealthProbe};
use view_service::provider::{
    Backend, CallContext, CallError, DataProvider, QuoteFetch, QuoteSource, RetryPolicy,
};
use view_service::tools::ToolRegistry;
use view_service::types::{Config, HealthSettings};
use view_service::views::{discover_custom_views, run_view, ViewCatalog};

// =============================================================================
// Test Helpers
// =============================================================================

const MANIFEST: &str = r#"[
    {"function": {"name": "stock_zh_a_hist", "description": "日线",
        "parameters": {"properties": {"symbol": {"type": "string"},
            "period": {"type": "string"}, "start_date": {"type": "string"},
            "end_date": {"type": "string"}, "adjust": {"type": "string"}},
            "required": ["symbol"]}}},
    {"function": {"name": "stock_a_indicator_lg",
        "parameters": {"properties": {"symbol": {"type": "string"}}}}},
    {"function": {"name": "stock_individual_info_em",
        "parameters": {"properties": {"symbol": {"type": "string"}}, "required": ["symbol"]}}},
    {"function": {"name": "stock_board_industry_spot_em"}},
    {"function": {"name": "stock_board_concept_spot_em"}},
    {"function": {"name": "stock_fund_flow_industry",
        "parameters": {"properties": {"symbol": {"type": "string"}}}}},
    {"function": {"name": "stock_news_em",
        "parameters": {"properties": {"symbol": {"type": "string"}}, "required": ["symbol"]}}}
]"#;

/// Answers from a fixed table and records every call.
#[derive(Default)]
struct TableBackend {
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl TableBackend {
    fn calls_to(&self, function: &str) -> Vec<Map<String, Value>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(f, _)| f == function)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

#[async_trait]
impl Backend for TableBackend {
    async fn call(
        &self,
        function: &str,
        args: &Map<String, Value>,
        _ctx: CallContext,
    ) -> Result<Value, CallError> {
        self.calls
            .lock()
            .unwrap()
            .push((function.to_string(), args.clone()));
        match function {
            "stock_zh_a_hist_tx" => Ok(json!([
                {"date": "2024-01-02", "open": 9.9, "close": 10.0},
                {"date": "2024-01-03", "open": 10.0, "close": 10.2}
            ])),
            "stock_individual_info_em" => Err(CallError::from_message("upstream returned HTTP 500")),
            "stock_board_industry_summary_ths" => Ok(json!([{"板块": "银行", "涨跌幅": 0.5}])),
            "stock_board_concept_summary_ths" => Err(CallError::Fatal("concept table unavailable".into())),
            "stock_news_em" => Ok(json!([{"新闻标题": "公告", "symbol": args.get("symbol")}])),
            other => Err(CallError::Fatal(format!("unexpected function {}", other))),
        }
    }
}

/// Quote backend that never has a quote.
struct NoQuotes;

#[async_trait]
impl QuoteSource for NoQuotes {
    async fn fetch_quotes(&self, _symbols: &[String], _ctx: CallContext) -> Result<QuoteFetch, CallError> {
        Ok(QuoteFetch::default())
    }
}

struct IdleProbe;

#[async_trait]
impl HealthProbe for IdleProbe {
    async fn probe(&self) -> Result<usize, String> {
        Ok(1)
    }
}

struct Harness {
    backend: Arc<TableBackend>,
    monitor: Arc<HealthMonitor>,
    provider: DataProvider,
    catalog: ViewCatalog,
}

fn harness(views_dir: Option<&std::path::Path>) -> Harness {
    let registry = Arc::new(ToolRegistry::from_json(MANIFEST).unwrap());
    let backend = Arc::new(TableBackend::default());
    let monitor = Arc::new(HealthMonitor::new(HealthSettings::default(), Arc::new(IdleProbe)));
    let provider = DataProvider::new(registry.clone(), backend.clone(), Arc::new(NoQuotes), &Config::default())
        .with_retry(RetryPolicy::none())
        .with_monitor(monitor.clone());
    let catalog = ViewCatalog::build(&registry, discover_custom_views(views_dir).unwrap());
    Harness {
        backend,
        monitor,
        provider,
        catalog,
    }
}

fn params(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

// =============================================================================
// Custom Views
// =============================================================================

#[tokio::test]
async fn test_stock_snapshot_partial_failure() {
    let h = harness(None);
    let spec = h.catalog.get("stock_snapshot_cn").unwrap();

    let res = run_view(spec, &params(json!({"symbol": "sz000001"})), &h.provider, false, 1).await;

    assert_eq!(res.meta.view, "stock_snapshot_cn");
    let keys: Vec<&String> = res.data.keys().collect();
    assert_eq!(keys, vec!["indicator", "info", "hist"]);

    assert_eq!(res.data["hist"]["errors"], json!([]));
    assert_eq!(res.data["hist"]["data"][1]["close"], json!(10.2));
    assert_eq!(res.data["hist"]["meta"]["script"], "view:stock_snapshot_cn");

    assert_eq!(res.errors.len(), 2);
    assert!(res.errors[0].starts_with("stock_a_indicator_lg: No quote returned for sz000001"));
    assert!(res.errors[1].starts_with("stock_individual_info_em: "));

    let tx = h.backend.calls_to("stock_zh_a_hist_tx");
    assert_eq!(tx.len(), 1);
    assert_eq!(tx[0]["symbol"], "sz000001");

    let global = h.monitor.get_stats(None).await;
    assert_eq!(global.total_calls, 3);
    assert_eq!(global.failed_calls, 2);
}

#[tokio::test]
async fn test_market_overview_keeps_plan_order_in_parallel() {
    let h = harness(None);
    let spec = h.catalog.get("market_overview_cn").unwrap();

    let res = run_view(spec, &Map::new(), &h.provider, false, 3).await;

    let keys: Vec<&String> = res.data.keys().collect();
    assert_eq!(keys, vec!["industry", "concept", "industry_flow"]);
    assert_eq!(res.errors, vec!["stock_board_concept_spot_em: concept table unavailable"]);
    assert_eq!(res.data["concept"]["data"], Value::Null);
    assert_eq!(res.data["industry_flow"]["meta"]["params"]["symbol"], "即时");
}

#[tokio::test]
async fn test_snapshot_without_symbol_is_plan_failure() {
    let h = harness(None);
    let spec = h.catalog.get("stock_snapshot_cn").unwrap();

    let res = run_view(spec, &Map::new(), &h.provider, false, 1).await;

    assert!(res.data.is_empty());
    assert_eq!(res.errors.len(), 1);
    assert!(res.errors[0].starts_with("Failed to build view plan: "));
    assert!(res.warnings.iter().any(|w| w.starts_with("params do not match schema")));
    assert!(h.backend.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_json_view_substitutes_params() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("news.json"),
        json!({
            "view_name": "news_digest",
            "description": "新闻",
            "params_schema": {
                "type": "object",
                "properties": {"symbol": {"type": "string", "default": "600000"}}
            },
            "steps": [{"key": "news", "tool": "stock_news_em", "args": {"symbol": "{{symbol}}"}}]
        })
        .to_string(),
    )
    .unwrap();
    let h = harness(Some(dir.path()));
    let spec = h.catalog.get("news_digest").unwrap();

    let res = run_view(spec, &params(json!({"symbol": "000001"})), &h.provider, false, 1).await;
    assert!(res.is_ok(), "{:?}", res.errors);
    assert_eq!(h.backend.calls_to("stock_news_em")[0]["symbol"], "000001");

    let res = run_view(spec, &Map::new(), &h.provider, false, 1).await;
    assert!(res.is_ok());
    assert_eq!(h.backend.calls_to("stock_news_em")[1]["symbol"], "600000");
}

// =============================================================================
// Tool Views
// =============================================================================

#[tokio::test]
async fn test_tool_view_validation_error_becomes_envelope() {
    let h = harness(None);
    let spec = h.catalog.get("stock_zh_a_hist").unwrap();

    let res = run_view(spec, &Map::new(), &h.provider, false, 1).await;

    assert_eq!(res.errors.len(), 1);
    assert_eq!(res.data["stock_zh_a_hist"]["data"], Value::Null);
    assert_eq!(res.data["stock_zh_a_hist"]["errors"][0], json!(res.errors[0]));
    assert!(h.backend.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_tool_view_success() {
    let h = harness(None);
    let spec = h.catalog.get("stock_news_em").unwrap();

    let res = run_view(spec, &params(json!({"symbol": "000001"})), &h.provider, true, 1).await;

    assert!(res.is_ok());
    assert_eq!(res.meta.params["symbol"], "000001");
    assert_eq!(res.data["stock_news_em"]["data"][0]["symbol"], "000001");
}

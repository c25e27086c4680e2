//! Backtest Framework Integration Tests
//!
//! Provider-backed backtests and replay from the on-disk cache.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use view_service::backtest::block_deal::{self, BlockDealOptions, BlockDealRule};
use view_service::backtest::{
    analyze_returns, data_fn, prices_fn, BacktestConfig, BacktestFramework, BacktestStatistics, Frame,
};
use view_service::provider::{CallOptions, ToolMeta, ToolProvider, ToolResult};
use view_service::Error;

// =============================================================================
// Test Helpers
// =============================================================================

/// Serves block deals and daily prices; records every call.
#[derive(Default)]
struct MarketProvider {
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

#[async_trait]
impl ToolProvider for MarketProvider {
    async fn call_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
        options: &CallOptions,
    ) -> view_service::Result<ToolResult> {
        assert_eq!(options.script, "backtest");
        self.calls.lock().unwrap().push((name.to_string(), args.clone()));
        let meta = ToolMeta::new("fake", name);
        let data = match (name, args.get("symbol").and_then(Value::as_str)) {
            ("stock_dzjy_mrmx", _) => json!([
                {"交易日期": "20240103", "代码": "000001", "成交价": 9.7, "成交额": 300.0},
                {"交易日期": "2024-01-03", "代码": "600000", "成交价": 5.0, "成交额": 1.0}
            ]),
            ("stock_zh_a_hist", Some("000001")) => json!([
                {"日期": "2024-01-02", "收盘": 10.0, "成交额": 1000.0},
                {"日期": "2024-01-03", "收盘": 10.0, "成交额": 3000.0},
                {"日期": "2024-01-04", "收盘": 11.0, "成交额": 2000.0}
            ]),
            // No trading day matching the deal, so the deal is dropped.
            ("stock_zh_a_hist", Some("600000")) => json!([
                {"日期": "2024-01-02", "收盘": 5.2, "成交额": 100.0}
            ]),
            ("stock_zh_a_hist", _) => json!([]),
            _ => return Ok(ToolResult::failed(meta, Value::Null, "unexpected tool")),
        };
        Ok(ToolResult::ok(meta, data))
    }
}

/// Every call fails upstream.
struct DownProvider;

#[async_trait]
impl ToolProvider for DownProvider {
    async fn call_tool(
        &self,
        name: &str,
        _args: &Map<String, Value>,
        _options: &CallOptions,
    ) -> view_service::Result<ToolResult> {
        Ok(ToolResult::failed(ToolMeta::new("fake", name), Value::Null, "RemoteDisconnected"))
    }
}

fn options() -> BlockDealOptions {
    BlockDealOptions {
        rule: BlockDealRule::BuildingPosition,
        start: "2024-01-01".into(),
        end: "2024-01-31".into(),
        holding: Some(1),
        max_symbols: 0,
        ..Default::default()
    }
}

// =============================================================================
// Block Deal Backtest
// =============================================================================

#[tokio::test]
async fn test_block_deal_over_provider() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MarketProvider::default());
    let fw = BacktestFramework::from_provider(dir.path(), provider.clone());

    let result = block_deal::run(&fw, &options()).await.unwrap();

    assert_eq!(result.signals.len(), 1);
    let signal = &result.signals[0];
    assert_eq!(signal.symbol, "000001");
    assert_eq!(signal.date, "2024-01-03");
    assert_eq!(signal.signal_type, "建仓型");
    assert!((signal.return_pct - 0.1).abs() < 1e-9);
    assert_eq!(result.statistics.total_signals, 1);
    assert!((result.statistics.win_rate - 1.0).abs() < 1e-12);

    let calls = provider.calls.lock().unwrap().clone();
    let (_, deal_args) = calls.iter().find(|(n, _)| n == "stock_dzjy_mrmx").unwrap();
    assert_eq!(
        Value::Object(deal_args.clone()),
        json!({"symbol": "A股", "start_date": "20240101", "end_date": "20240131"})
    );
    let price_args: Vec<&Map<String, Value>> = calls
        .iter()
        .filter(|(n, _)| n == "stock_zh_a_hist")
        .map(|(_, a)| a)
        .collect();
    assert!(price_args.iter().all(|a| a["period"] == "daily"));
    assert!(price_args.iter().any(|a| a["start_date"] == "20240101"));
}

#[tokio::test]
async fn test_cached_backtest_replays_offline() {
    let dir = tempfile::tempdir().unwrap();

    let online = BacktestFramework::from_provider(dir.path(), Arc::new(MarketProvider::default()));
    let first = block_deal::run(&online, &options()).await.unwrap();

    let offline = BacktestFramework::from_provider(dir.path(), Arc::new(DownProvider));
    let second = block_deal::run(&offline, &options()).await.unwrap();

    assert_eq!(first.signals, second.signals);
    assert_eq!(first.to_document(), second.to_document());

    let cached: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(cached.iter().any(|n| n.starts_with("stock_dzjy_mrmx_2024-01-01_2024-01-31_")));
    assert!(cached.iter().any(|n| n.starts_with("price_000001_")));
    assert!(cached.iter().all(|n| n.ends_with(".csv.gz")));
}

#[tokio::test]
async fn test_upstream_failure_surfaces_as_error() {
    let dir = tempfile::tempdir().unwrap();
    let fw = BacktestFramework::from_provider(dir.path(), Arc::new(DownProvider));

    let err = block_deal::run(&fw, &options()).await.unwrap_err();
    assert!(matches!(err, Error::Upstream(_)), "{:?}", err);
    assert!(err.to_string().contains("stock_dzjy_mrmx"));
}

#[tokio::test]
async fn test_saved_document() {
    let dir = tempfile::tempdir().unwrap();
    let fw = BacktestFramework::from_provider(dir.path().join("cache"), Arc::new(MarketProvider::default()));
    let result = block_deal::run(&fw, &options()).await.unwrap();

    let out = dir.path().join("results").join("rule1.json");
    result.save(&out).await.unwrap();
    let doc: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();

    assert_eq!(doc["config"]["skill_name"], "block-deal-monitor");
    assert_eq!(doc["config"]["holding_period"], json!(1));
    assert_eq!(doc["signals_count"], json!(1));
    assert_eq!(doc["statistics"]["total_signals"], json!(1));
    assert_eq!(doc["signals"][0]["symbol"], "000001");
}

// =============================================================================
// Framework Pipeline
// =============================================================================

fn cached_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().ends_with(".csv.gz"))
        .collect();
    files.sort();
    files
}

fn lhb_table() -> Frame {
    Frame::from_records(&json!([
        {"股票代码": "000001", "股票名称": "平安银行", "交易日期": "2024-01-03", "净买额": 1.5e7, "上榜原因": "涨幅偏离"},
        {"股票代码": "600000", "股票名称": "浦发银行", "交易日期": "2024-01-04", "净买额": -2.0e6, "上榜原因": "跌幅偏离"}
    ]))
}

#[tokio::test]
async fn test_refetched_frame_writes_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let fetches = Arc::new(AtomicUsize::new(0));
    let counter = fetches.clone();
    let fw = BacktestFramework::new(
        dir.path(),
        data_fn(move |_, _, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(lhb_table())
        }),
        prices_fn(|_, _, _| Ok(Frame::default())),
    );
    let kwargs = json!({"symbol": "近一月"}).as_object().unwrap().clone();

    fw.get_historical_data("stock_lhb_detail_em", "2024-01-01", "2024-01-31", &kwargs)
        .await
        .unwrap();
    let first = cached_files(dir.path());
    assert_eq!(first.len(), 1);
    let first_bytes = std::fs::read(&first[0]).unwrap();

    // Dropping the entry forces a second upstream fetch and rewrite.
    std::fs::remove_file(&first[0]).unwrap();
    fw.get_historical_data("stock_lhb_detail_em", "2024-01-01", "2024-01-31", &kwargs)
        .await
        .unwrap();
    let second = cached_files(dir.path());

    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(first, second);
    assert_eq!(first_bytes, std::fs::read(&second[0]).unwrap());
}

#[tokio::test]
async fn test_rule_without_signals_gives_zero_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let prices_called = Arc::new(AtomicUsize::new(0));
    let counter = prices_called.clone();
    let fw = BacktestFramework::new(
        dir.path(),
        data_fn(|_, _, _, _| Ok(lhb_table())),
        prices_fn(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Frame::default())
        }),
    );
    let config = BacktestConfig {
        skill_name: "dragon-tiger-list".into(),
        start_date: "2024-01-01".into(),
        end_date: "2024-01-31".into(),
        holding_period: 5,
        thresholds: json!({"net_buy_min": 1.0e9}).as_object().unwrap().clone(),
        max_signals: 0,
    };

    let result = fw
        .run_backtest(
            &config,
            |frame: &Frame, th: &Map<String, Value>| {
                let min = th["net_buy_min"].as_f64().unwrap_or(0.0);
                Ok(frame.filter(|r| r.get("净买额").and_then(Value::as_f64).is_some_and(|v| v >= min)))
            },
            "stock_lhb_detail_em",
            &Map::new(),
        )
        .await
        .unwrap();

    assert!(result.signals.is_empty());
    assert_eq!(result.statistics, BacktestStatistics::default());
    assert_eq!(prices_called.load(Ordering::SeqCst), 0);

    let doc = result.to_document();
    assert_eq!(doc["signals_count"], json!(0));
    assert_eq!(doc["signals"], json!([]));
    assert_eq!(doc["config"]["skill_name"], "dragon-tiger-list");
    let stats = doc["statistics"].as_object().unwrap();
    assert_eq!(stats["total_signals"], json!(0));
    for key in ["avg_return", "median_return", "win_rate", "profit_loss_ratio", "sharpe_ratio"] {
        assert_eq!(stats[key].as_f64(), Some(0.0), "{}", key);
    }
    serde_json::to_string_pretty(&doc).unwrap();
}

// =============================================================================
// Statistics Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_statistics_are_ordered(returns in prop::collection::vec(-1.0f64..1.0, 1..200)) {
        let stats = analyze_returns(&returns);
        prop_assert_eq!(stats.total_signals, returns.len());
        prop_assert!(stats.min_return <= stats.return_25pct + 1e-12);
        prop_assert!(stats.return_25pct <= stats.median_return + 1e-12);
        prop_assert!(stats.median_return <= stats.return_75pct + 1e-12);
        prop_assert!(stats.return_75pct <= stats.max_return + 1e-12);
        prop_assert!((0.0..=1.0).contains(&stats.win_rate));
        prop_assert!(stats.profit_loss_ratio >= 0.0);
    }
}

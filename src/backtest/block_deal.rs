//! Block-deal (大宗交易) rule set.
//!
//! Raw deals from `stock_dzjy_mrmx` are joined with each symbol's daily
//! history to derive:
//! - 折价率 = (成交价 - 收盘价) / 收盘价
//! - 大宗成交额 = 成交额
//! - 成交金额占比 = 大宗成交额 / 当日成交额
//! - 日均成交额 = trailing 20-day mean turnover, including the deal day

use super::frame::{cell_f64, cell_text, Frame, Row};
use super::framework::{apply_rule, BacktestConfig, BacktestFramework, BacktestResult};
use crate::provider::symbols::normalize_yyyymmdd;
use crate::types::{Error, Result};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap};

pub const DATA_SOURCE: &str = "stock_dzjy_mrmx";
pub const SKILL_NAME: &str = "block-deal-monitor";
const AVG_TURNOVER_WINDOW: usize = 20;

/// `YYYYMMDD...` or `YYYY-MM-DD...` to `YYYY-MM-DD`.
pub fn to_ymd10(value: &Value) -> String {
    let s = cell_text(value).trim().to_string();
    let bytes = s.as_bytes();
    if bytes.len() >= 10 && bytes[4] == b'-' && bytes[7] == b'-' {
        if let Some(head) = s.get(..10) {
            return head.to_string();
        }
    }
    if bytes.len() >= 8 && bytes[..8].iter().all(u8::is_ascii_digit) {
        return format!("{}-{}-{}", &s[..4], &s[4..6], &s[6..8]);
    }
    s.chars().take(10).collect()
}

struct PricePoint {
    close: Option<f64>,
    turnover: Option<f64>,
    avg_turnover: Option<f64>,
}

/// Adds 当日成交额, 日均成交额, 大宗成交额, 折价率 and 成交金额占比, dropping
/// deals without a matching price day.
///
/// `max_symbols > 0` keeps only the symbols with the largest total block
/// turnover.
pub async fn enrich_features(
    framework: &BacktestFramework,
    deals: &Frame,
    start: &str,
    end: &str,
    max_symbols: usize,
) -> Result<Frame> {
    if deals.is_empty() {
        return Ok(deals.clone());
    }
    let mut out = deals.clone();
    out.rename("日期", "交易日期");
    out.rename("代码", "股票代码");
    out.rename("成交价格", "成交价");
    out.rename("成交金额", "成交额");

    let mut missing: Vec<&str> = ["交易日期", "股票代码", "成交价", "成交额"]
        .into_iter()
        .filter(|c| !out.has_column(c))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        return Err(Error::validation(format!(
            "{} missing columns: {:?}",
            DATA_SOURCE, missing
        )));
    }

    out.map_column("交易日期", |v| Value::String(to_ymd10(v)));
    out.map_column("股票代码", |v| Value::String(cell_text(v)));

    if max_symbols > 0 {
        let top = top_symbols_by_turnover(&out, max_symbols);
        out = out.filter(|r| r.get("股票代码").is_some_and(|v| top.contains(&cell_text(v))));
    }

    let symbols: BTreeSet<String> = out
        .rows()
        .filter_map(|r| r.get("股票代码").map(cell_text))
        .collect();

    let mut prices: HashMap<(String, String), PricePoint> = HashMap::new();
    let mut loaded = 0usize;
    for sym in &symbols {
        let history = framework.get_price_history(sym, start, end).await?;
        if history.is_empty() {
            continue;
        }
        let Some(points) = daily_points(history) else {
            continue;
        };
        loaded += 1;
        for (date, point) in points {
            prices.entry((sym.clone(), date)).or_insert(point);
        }
    }
    if loaded == 0 {
        return Err(Error::validation("No price history loaded; cannot compute discount."));
    }

    let mut columns: Vec<String> = out
        .columns()
        .iter()
        .filter(|c| c.as_str() != "成交额")
        .cloned()
        .collect();
    columns.extend(
        ["当日成交额", "日均成交额", "大宗成交额", "折价率", "成交金额占比"]
            .iter()
            .map(|s| s.to_string()),
    );
    let mut enriched = Frame::new(columns);

    for row in out.rows() {
        let sym = row.get("股票代码").map(cell_text).unwrap_or_default();
        let date = row.get("交易日期").map(cell_text).unwrap_or_default();
        let Some(point) = prices.get(&(sym, date)) else {
            continue;
        };
        let block = row.get("成交额").and_then(cell_f64);
        let deal_price = row.get("成交价").and_then(cell_f64);

        let discount = match (deal_price, point.close) {
            (Some(p), Some(c)) if c != 0.0 => Some((p - c) / c),
            _ => None,
        };
        let share = match (block, point.turnover) {
            (Some(b), Some(t)) if t != 0.0 => Some(b / t),
            _ => None,
        };
        let (Some(discount), Some(share), Some(avg)) = (discount, share, point.avg_turnover) else {
            continue;
        };

        let mut values: Vec<Value> = out
            .columns()
            .iter()
            .zip(row.values())
            .filter(|(c, _)| c.as_str() != "成交额")
            .map(|(_, v)| v.clone())
            .collect();
        values.push(json!(point.turnover));
        values.push(json!(avg));
        values.push(json!(block));
        values.push(json!(discount));
        values.push(json!(share));
        enriched.push_row(values);
    }
    Ok(enriched)
}

fn top_symbols_by_turnover(frame: &Frame, n: usize) -> Vec<String> {
    let mut totals: Vec<(String, f64)> = Vec::new();
    for row in frame.rows() {
        let sym = row.get("股票代码").map(cell_text).unwrap_or_default();
        let amount = row.get("成交额").and_then(cell_f64).unwrap_or(0.0);
        match totals.iter_mut().find(|(s, _)| *s == sym) {
            Some((_, total)) => *total += amount,
            None => totals.push((sym, amount)),
        }
    }
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    totals.into_iter().take(n).map(|(s, _)| s).collect()
}

/// Per-date close, turnover and trailing mean turnover, in date order.
fn daily_points(mut history: Frame) -> Option<Vec<(String, PricePoint)>> {
    history.rename("date", "日期");
    history.rename("close", "收盘");
    history.rename("amount", "成交额");
    if !["日期", "收盘", "成交额"].iter().all(|c| history.has_column(c)) {
        return None;
    }
    history.map_column("日期", |v| Value::String(to_ymd10(v)));
    history.sort_by_text("日期");

    let turnovers: Vec<Option<f64>> = history
        .rows()
        .map(|r| r.get("成交额").and_then(cell_f64))
        .collect();
    Some(
        history
            .rows()
            .enumerate()
            .map(|(i, r)| {
                let from = (i + 1).saturating_sub(AVG_TURNOVER_WINDOW);
                let present: Vec<f64> = turnovers[from..=i].iter().flatten().copied().collect();
                let avg = if present.is_empty() {
                    None
                } else {
                    Some(present.iter().sum::<f64>() / present.len() as f64)
                };
                (
                    r.get("日期").map(cell_text).unwrap_or_default(),
                    PricePoint {
                        close: r.get("收盘").and_then(cell_f64),
                        turnover: turnovers[i],
                        avg_turnover: avg,
                    },
                )
            })
            .collect(),
    )
}

// =============================================================================
// Rules
// =============================================================================

fn threshold(thresholds: &Map<String, Value>, key: &str, default: f64) -> f64 {
    thresholds.get(key).and_then(cell_f64).unwrap_or(default)
}

fn require(frame: &Frame, columns: &[&str]) -> Result<()> {
    match columns.iter().find(|c| !frame.has_column(c)) {
        Some(c) => Err(Error::validation(format!("Missing column: {}.", c))),
        None => Ok(()),
    }
}

fn num(row: &Row<'_>, column: &str) -> Option<f64> {
    row.get(column).and_then(cell_f64)
}

fn tagged(mut signals: Frame, label: &str) -> Frame {
    signals.fill_column("信号类型", json!(label));
    signals
}

/// Rule 1, 建仓型: moderate discount within `[discount_rate_min, discount_rate_max]`.
pub fn rule_building_position(frame: &Frame, thresholds: &Map<String, Value>) -> Result<Frame> {
    require(frame, &["折价率"])?;
    let lo = threshold(thresholds, "discount_rate_min", -0.05);
    let hi = threshold(thresholds, "discount_rate_max", -0.02);
    let signals = frame.filter(|r| num(r, "折价率").is_some_and(|d| d >= lo && d <= hi));
    Ok(tagged(signals, "建仓型"))
}

/// Rule 2, 抛压型: deep discount on a large share of the day's turnover.
pub fn rule_selling_pressure(frame: &Frame, thresholds: &Map<String, Value>) -> Result<Frame> {
    require(frame, &["折价率", "成交金额占比"])?;
    let discount = threshold(thresholds, "discount_threshold", -0.07);
    let ratio = threshold(thresholds, "volume_ratio", 0.10);
    let signals = frame.filter(|r| {
        num(r, "折价率").is_some_and(|d| d < discount) && num(r, "成交金额占比").is_some_and(|s| s > ratio)
    });
    Ok(tagged(signals, "抛压型"))
}

/// Rule 3, 溢价警示: deal price well above the close.
pub fn rule_premium_warning(frame: &Frame, thresholds: &Map<String, Value>) -> Result<Frame> {
    require(frame, &["折价率"])?;
    let premium = threshold(thresholds, "premium_threshold", 0.05);
    let signals = frame.filter(|r| num(r, "折价率").is_some_and(|d| d > premium));
    Ok(tagged(signals, "溢价警示"))
}

/// Rule 4, 流动性风险: thin name, large block, discounted.
pub fn rule_liquidity_risk(frame: &Frame, thresholds: &Map<String, Value>) -> Result<Frame> {
    require(frame, &["日均成交额", "大宗成交额", "折价率"])?;
    let avg_max = threshold(thresholds, "avg_volume_threshold", 50_000_000.0);
    let block_ratio = threshold(thresholds, "block_ratio", 0.5);
    let discount = threshold(thresholds, "discount_threshold", -0.05);
    let signals = frame.filter(|r| {
        match (num(r, "日均成交额"), num(r, "大宗成交额"), num(r, "折价率")) {
            (Some(avg), Some(block), Some(d)) => avg < avg_max && block > avg * block_ratio && d < discount,
            _ => false,
        }
    });
    Ok(tagged(signals, "流动性风险"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDealRule {
    BuildingPosition,
    SellingPressure,
    PremiumWarning,
    LiquidityRisk,
}

impl BlockDealRule {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::BuildingPosition),
            2 => Some(Self::SellingPressure),
            3 => Some(Self::PremiumWarning),
            4 => Some(Self::LiquidityRisk),
            _ => None,
        }
    }

    /// File stem for the saved result.
    pub fn slug(self) -> &'static str {
        match self {
            Self::BuildingPosition => "rule1_building_position",
            Self::SellingPressure => "rule2_selling_pressure",
            Self::PremiumWarning => "rule3_premium_warning",
            Self::LiquidityRisk => "rule4_liquidity_risk",
        }
    }

    pub fn default_holding(self) -> u32 {
        match self {
            Self::BuildingPosition => 20,
            Self::SellingPressure | Self::LiquidityRisk => 10,
            Self::PremiumWarning => 5,
        }
    }

    pub fn default_thresholds(self) -> Map<String, Value> {
        let v = match self {
            Self::BuildingPosition => json!({
                "discount_rate_min": -0.05,
                "discount_rate_max": -0.02,
                "consecutive_days": 3,
                "avg_discount_change": 0.01,
            }),
            Self::SellingPressure => json!({"discount_threshold": -0.07, "volume_ratio": 0.10}),
            Self::PremiumWarning => json!({"premium_threshold": 0.05}),
            Self::LiquidityRisk => json!({
                "avg_volume_threshold": 50_000_000,
                "block_ratio": 0.5,
                "discount_threshold": -0.05,
            }),
        };
        v.as_object().cloned().unwrap_or_default()
    }

    pub fn apply(self, frame: &Frame, thresholds: &Map<String, Value>) -> Result<Frame> {
        match self {
            Self::BuildingPosition => rule_building_position(frame, thresholds),
            Self::SellingPressure => rule_selling_pressure(frame, thresholds),
            Self::PremiumWarning => rule_premium_warning(frame, thresholds),
            Self::LiquidityRisk => rule_liquidity_risk(frame, thresholds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockDealOptions {
    pub rule: BlockDealRule,
    /// `YYYY-MM-DD`
    pub start: String,
    pub end: String,
    /// Defaults to the rule's own holding period.
    pub holding: Option<u32>,
    pub max_signals: usize,
    /// Market filter passed to the deal source, e.g. `A股`.
    pub symbol: String,
    pub max_symbols: usize,
}

impl Default for BlockDealOptions {
    fn default() -> Self {
        Self {
            rule: BlockDealRule::BuildingPosition,
            start: "2020-01-01".to_string(),
            end: "2023-12-31".to_string(),
            holding: None,
            max_signals: 2000,
            symbol: "A股".to_string(),
            max_symbols: 200,
        }
    }
}

/// Fetch deals, enrich, apply the rule, measure forward returns.
pub async fn run(framework: &BacktestFramework, options: &BlockDealOptions) -> Result<BacktestResult> {
    let rule = options.rule;
    let config = BacktestConfig {
        skill_name: SKILL_NAME.to_string(),
        start_date: options.start.clone(),
        end_date: options.end.clone(),
        holding_period: options.holding.unwrap_or_else(|| rule.default_holding()),
        thresholds: rule.default_thresholds(),
        max_signals: options.max_signals,
    };

    let mut kwargs = Map::new();
    kwargs.insert("symbol".into(), json!(options.symbol));
    kwargs.insert("start_date".into(), json!(normalize_yyyymmdd(Some(options.start.as_str()), "")));
    kwargs.insert("end_date".into(), json!(normalize_yyyymmdd(Some(options.end.as_str()), "")));

    let mut raw = framework
        .get_historical_data(DATA_SOURCE, &options.start, &options.end, &kwargs)
        .await?;
    raw.rename("证券简称", "名称");
    let deals = BacktestFramework::clean_data(&raw);
    if deals.is_empty() {
        tracing::info!(rule = rule.slug(), deals = raw.len(), "block_deal_no_deals");
        return Ok(BacktestResult::new(config, Vec::new()));
    }
    let features = enrich_features(framework, &deals, &options.start, &options.end, options.max_symbols).await?;
    let signals = apply_rule(
        |f: &Frame, t: &Map<String, Value>| rule.apply(f, t),
        &features,
        &config.thresholds,
        config.max_signals,
    )?;
    tracing::info!(rule = rule.slug(), deals = raw.len(), signals = signals.len(), "block_deal_signals");

    let results = framework.calculate_returns(&signals, config.holding_period).await;
    Ok(BacktestResult::new(config, results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::framework::{data_fn, prices_fn};

    fn history() -> Frame {
        Frame::from_records(&json!([
            {"date": "2024-01-03", "close": 10.0, "amount": 3000.0},
            {"date": "2024-01-02", "close": 10.0, "amount": 1000.0},
            {"date": "2024-01-04", "close": 11.0, "amount": 2000.0}
        ]))
    }

    fn deals() -> Frame {
        Frame::from_records(&json!([
            {"交易日期": "20240103", "代码": "000001", "成交价": 9.7, "成交额": 300.0},
            {"交易日期": "2024-01-04", "代码": "000001", "成交价": 11.0, "成交额": 100.0},
            {"交易日期": "2024-01-05", "代码": "000001", "成交价": 9.0, "成交额": 100.0},
            {"交易日期": "2024-01-03", "代码": "600000", "成交价": 5.0, "成交额": 1.0}
        ]))
    }

    fn framework(dir: &std::path::Path) -> BacktestFramework {
        BacktestFramework::new(
            dir,
            data_fn(|_, _, _, _| Ok(deals())),
            prices_fn(|sym, _, _| {
                if sym == "000001" {
                    Ok(history())
                } else {
                    Ok(Frame::default())
                }
            }),
        )
    }

    #[test]
    fn test_to_ymd10() {
        assert_eq!(to_ymd10(&json!("20240103")), "2024-01-03");
        assert_eq!(to_ymd10(&json!("2024-01-03 00:00:00")), "2024-01-03");
        assert_eq!(to_ymd10(&json!(20240103)), "2024-01-03");
        assert_eq!(to_ymd10(&Value::Null), "");
    }

    #[tokio::test]
    async fn test_enrich_features() {
        let dir = tempfile::tempdir().unwrap();
        let fw = framework(dir.path());
        let out = enrich_features(&fw, &deals(), "2024-01-01", "2024-01-31", 0).await.unwrap();

        // 01-05 has no price day, 600000 has no history
        assert_eq!(out.len(), 2);
        assert!(!out.has_column("成交额"));
        let first = out.row(0).unwrap();
        assert_eq!(first.get("交易日期"), Some(&json!("2024-01-03")));
        assert!((num(&first, "折价率").unwrap() + 0.03).abs() < 1e-9);
        assert!((num(&first, "成交金额占比").unwrap() - 0.1).abs() < 1e-9);
        assert!((num(&first, "日均成交额").unwrap() - 2000.0).abs() < 1e-9);
        assert_eq!(num(&first, "大宗成交额"), Some(300.0));
    }

    #[tokio::test]
    async fn test_enrich_requires_columns_and_prices() {
        let dir = tempfile::tempdir().unwrap();
        let fw = framework(dir.path());
        let bad = Frame::from_records(&json!([{"交易日期": "2024-01-03", "股票代码": "000001"}]));
        let err = enrich_features(&fw, &bad, "a", "b", 0).await.unwrap_err();
        assert!(err.to_string().contains("missing columns"));

        let no_prices = Frame::from_records(&json!([
            {"交易日期": "2024-01-03", "股票代码": "600000", "成交价": 5.0, "成交额": 1.0}
        ]));
        let err = enrich_features(&fw, &no_prices, "a", "b", 0).await.unwrap_err();
        assert!(err.to_string().contains("No price history loaded"));
    }

    #[tokio::test]
    async fn test_max_symbols_keeps_largest() {
        let dir = tempfile::tempdir().unwrap();
        let fw = framework(dir.path());
        let out = enrich_features(&fw, &deals(), "2024-01-01", "2024-01-31", 1).await.unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.rows().all(|r| r.get("股票代码") == Some(&json!("000001"))));
    }

    #[test]
    fn test_rules() {
        let frame = Frame::from_records(&json!([
            {"折价率": -0.03, "成交金额占比": 0.2, "日均成交额": 1.0e7, "大宗成交额": 6.0e6},
            {"折价率": -0.08, "成交金额占比": 0.2, "日均成交额": 1.0e9, "大宗成交额": 1.0},
            {"折价率": 0.06, "成交金额占比": 0.01, "日均成交额": 1.0e7, "大宗成交额": 1.0}
        ]));
        let th = Map::new();
        let r1 = rule_building_position(&frame, &th).unwrap();
        assert_eq!(r1.len(), 1);
        assert_eq!(r1.row(0).unwrap().get("信号类型"), Some(&json!("建仓型")));
        assert_eq!(rule_selling_pressure(&frame, &th).unwrap().len(), 1);
        assert_eq!(rule_premium_warning(&frame, &th).unwrap().len(), 1);
        assert_eq!(rule_liquidity_risk(&frame, &th).unwrap().len(), 0);

        let loose = json!({"discount_threshold": 0.0}).as_object().unwrap().clone();
        assert_eq!(rule_liquidity_risk(&frame, &loose).unwrap().len(), 1);

        let err = rule_building_position(&Frame::default(), &th).unwrap_err();
        assert!(err.to_string().contains("Missing column: 折价率."));
    }

    #[tokio::test]
    async fn test_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let fw = framework(dir.path());
        let options = BlockDealOptions {
            start: "2024-01-01".into(),
            end: "2024-01-31".into(),
            holding: Some(1),
            max_symbols: 0,
            ..Default::default()
        };
        let result = run(&fw, &options).await.unwrap();
        assert_eq!(result.config.skill_name, SKILL_NAME);
        assert_eq!(result.signals.len(), 1);
        assert_eq!(result.signals[0].signal_type, "建仓型");
        assert_eq!(result.signals[0].date, "2024-01-03");
        assert!((result.signals[0].return_pct - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_run_skips_st_deals() {
        let dir = tempfile::tempdir().unwrap();
        let fw = BacktestFramework::new(
            dir.path(),
            data_fn(|_, _, _, _| {
                Ok(Frame::from_records(&json!([
                    {"交易日期": "20240103", "代码": "000001", "证券简称": "平安银行", "成交价": 9.7, "成交额": 300.0},
                    {"交易日期": "20240103", "代码": "000002", "证券简称": "*ST万科", "成交价": 9.7, "成交额": 300.0}
                ])))
            }),
            prices_fn(|_, _, _| Ok(history())),
        );
        let options = BlockDealOptions {
            start: "2024-01-01".into(),
            end: "2024-01-31".into(),
            holding: Some(1),
            max_symbols: 0,
            ..Default::default()
        };
        let result = run(&fw, &options).await.unwrap();
        let symbols: Vec<&str> = result.signals.iter().map(|s| s.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["000001"]);
    }

    #[tokio::test]
    async fn test_run_without_deals_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fw = BacktestFramework::new(
            dir.path(),
            data_fn(|_, _, _, _| Ok(Frame::default())),
            prices_fn(|_, _, _| Ok(history())),
        );
        let result = run(&fw, &BlockDealOptions::default()).await.unwrap();
        assert!(result.signals.is_empty());
        assert_eq!(result.statistics.total_signals, 0);
    }
}

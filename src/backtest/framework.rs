//! Signal backtests: fetch, clean, apply a rule, measure forward returns.
//!
//! Inputs come through [`DataFetcher`] and [`PriceFetcher`] so the whole
//! pipeline runs offline in tests; every fetch goes through the
//! [`FrameCache`].

use super::cache::FrameCache;
use super::frame::{cell_f64, cell_text, is_missing, Frame};
use super::stats::{analyze_returns, BacktestStatistics};
use crate::provider::symbols::normalize_a_symbol;
use crate::provider::{CallOptions, ToolProvider};
use crate::recovery::with_recovery;
use crate::types::{Error, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub skill_name: String,
    /// `YYYY-MM-DD`
    pub start_date: String,
    /// `YYYY-MM-DD`
    pub end_date: String,
    /// Trading days held after entry.
    pub holding_period: u32,
    pub thresholds: Map<String, Value>,
    /// 0 means no limit.
    #[serde(default)]
    pub max_signals: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
    pub date: String,
    pub symbol: String,
    pub signal_type: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub return_pct: f64,
    pub max_drawdown: f64,
    pub holding_days: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestResult {
    pub config: BacktestConfig,
    pub signals: Vec<SignalResult>,
    pub statistics: BacktestStatistics,
}

impl BacktestResult {
    pub fn new(config: BacktestConfig, signals: Vec<SignalResult>) -> Self {
        let returns: Vec<f64> = signals.iter().map(|s| s.return_pct).collect();
        let statistics = analyze_returns(&returns);
        Self {
            config,
            signals,
            statistics,
        }
    }

    /// `{config, statistics, signals_count, signals}` with statistics rounded
    /// to 6 decimal places.
    pub fn to_document(&self) -> Value {
        json!({
            "config": self.config,
            "statistics": self.statistics.rounded(),
            "signals_count": self.signals.len(),
            "signals": self.signals,
        })
    }

    /// Pretty JSON at `path`, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(&self.to_document())?;
        tokio::fs::write(path, text).await?;
        Ok(())
    }
}

// =============================================================================
// Fetchers
// =============================================================================

/// Source of raw event tables (`data_source` is a tool name).
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn fetch(
        &self,
        data_source: &str,
        start_date: &str,
        end_date: &str,
        kwargs: &Map<String, Value>,
    ) -> Result<Frame>;
}

/// Daily price history for one six-digit symbol.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    async fn fetch_prices(&self, symbol: &str, start_date: &str, end_date: &str) -> Result<Frame>;
}

/// Both fetchers backed by the data provider.
#[derive(Clone)]
pub struct ProviderFetcher {
    provider: Arc<dyn ToolProvider>,
}

impl std::fmt::Debug for ProviderFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFetcher").finish_non_exhaustive()
    }
}

impl ProviderFetcher {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self { provider }
    }

    async fn call(&self, tool: &str, args: &Map<String, Value>) -> Result<Frame> {
        let options = CallOptions {
            refresh: false,
            script: "backtest".to_string(),
        };
        let res = self.provider.call_tool(tool, args, &options).await?;
        if !res.errors.is_empty() {
            return Err(Error::upstream(format!("{}: {}", tool, res.errors.join("; "))));
        }
        Ok(Frame::from_records(&res.data))
    }
}

#[async_trait]
impl DataFetcher for ProviderFetcher {
    async fn fetch(
        &self,
        data_source: &str,
        _start_date: &str,
        _end_date: &str,
        kwargs: &Map<String, Value>,
    ) -> Result<Frame> {
        self.call(data_source, kwargs).await
    }
}

#[async_trait]
impl PriceFetcher for ProviderFetcher {
    async fn fetch_prices(&self, symbol: &str, start_date: &str, end_date: &str) -> Result<Frame> {
        let mut args = Map::new();
        args.insert("symbol".into(), json!(symbol));
        args.insert("period".into(), json!("daily"));
        args.insert("start_date".into(), json!(start_date.replace('-', "")));
        args.insert("end_date".into(), json!(end_date.replace('-', "")));
        args.insert("adjust".into(), json!(""));
        self.call("stock_zh_a_hist", &args).await
    }
}

struct FnData<F>(F);

#[async_trait]
impl<F> DataFetcher for FnData<F>
where
    F: Fn(&str, &str, &str, &Map<String, Value>) -> Result<Frame> + Send + Sync,
{
    async fn fetch(&self, source: &str, start: &str, end: &str, kwargs: &Map<String, Value>) -> Result<Frame> {
        (self.0)(source, start, end, kwargs)
    }
}

struct FnPrices<F>(F);

#[async_trait]
impl<F> PriceFetcher for FnPrices<F>
where
    F: Fn(&str, &str, &str) -> Result<Frame> + Send + Sync,
{
    async fn fetch_prices(&self, symbol: &str, start: &str, end: &str) -> Result<Frame> {
        (self.0)(symbol, start, end)
    }
}

/// Wrap a closure as a [`DataFetcher`].
pub fn data_fn<F>(f: F) -> Arc<dyn DataFetcher>
where
    F: Fn(&str, &str, &str, &Map<String, Value>) -> Result<Frame> + Send + Sync + 'static,
{
    Arc::new(FnData(f))
}

/// Wrap a closure as a [`PriceFetcher`].
pub fn prices_fn<F>(f: F) -> Arc<dyn PriceFetcher>
where
    F: Fn(&str, &str, &str) -> Result<Frame> + Send + Sync + 'static,
{
    Arc::new(FnPrices(f))
}

// =============================================================================
// Framework
// =============================================================================

pub struct BacktestFramework {
    cache: FrameCache,
    data: Arc<dyn DataFetcher>,
    prices: Arc<dyn PriceFetcher>,
}

impl std::fmt::Debug for BacktestFramework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestFramework")
            .field("cache_dir", &self.cache.dir())
            .finish_non_exhaustive()
    }
}

impl BacktestFramework {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        data: Arc<dyn DataFetcher>,
        prices: Arc<dyn PriceFetcher>,
    ) -> Self {
        Self {
            cache: FrameCache::new(cache_dir),
            data,
            prices,
        }
    }

    pub fn from_provider(cache_dir: impl Into<PathBuf>, provider: Arc<dyn ToolProvider>) -> Self {
        let fetcher = Arc::new(ProviderFetcher::new(provider));
        Self::new(cache_dir, fetcher.clone(), fetcher)
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    /// Raw table for `data_source` over the window, cached by request.
    pub async fn get_historical_data(
        &self,
        data_source: &str,
        start_date: &str,
        end_date: &str,
        kwargs: &Map<String, Value>,
    ) -> Result<Frame> {
        let base = FrameCache::base_name(data_source, start_date, end_date, kwargs);
        if let Some(frame) = self.cache.load(&base).await {
            tracing::debug!(source = data_source, rows = frame.len(), "backtest_cache_hit");
            return Ok(frame);
        }

        let frame = self.data.fetch(data_source, start_date, end_date, kwargs).await?;
        self.write_cache(&base, &frame).await;
        Ok(frame)
    }

    /// Price history for a symbol. Unusable symbols and empty histories give
    /// an empty frame and are never cached.
    pub async fn get_price_history(&self, symbol: &str, start_date: &str, end_date: &str) -> Result<Frame> {
        let sym = normalize_a_symbol(symbol);
        if sym.is_empty() {
            return Ok(Frame::default());
        }
        let source = format!("price_{}", sym);
        let base = FrameCache::base_name(&source, start_date, end_date, &Map::new());
        if let Some(frame) = self.cache.load(&base).await {
            tracing::debug!(source = %source, rows = frame.len(), "backtest_cache_hit");
            return Ok(frame);
        }

        let frame = self.prices.fetch_prices(&sym, start_date, end_date).await?;
        if frame.is_empty() {
            return Ok(Frame::default());
        }
        self.write_cache(&base, &frame).await;
        Ok(frame)
    }

    async fn write_cache(&self, base: &str, frame: &Frame) {
        match self.cache.store(base, frame).await {
            Ok(path) => {
                tracing::debug!(path = %path.display(), rows = frame.len(), "backtest_cache_write")
            }
            Err(e) => tracing::warn!(base, error = %e, "backtest_cache_write_failed"),
        }
    }

    /// Drops ST names and rows missing any of the first five columns.
    pub fn clean_data(frame: &Frame) -> Frame {
        if frame.is_empty() {
            return frame.clone();
        }
        let key_columns: Vec<String> = frame.columns().iter().take(5).cloned().collect();
        let check_keys = key_columns.len() >= 5;
        frame.filter(|row| {
            for name_col in ["股票名称", "名称"] {
                if let Some(v) = row.get(name_col) {
                    if cell_text(v).contains("ST") {
                        return false;
                    }
                }
            }
            !check_keys
                || key_columns
                    .iter()
                    .all(|c| row.get(c).is_some_and(|v| !is_missing(v)))
        })
    }

    /// Forward return for every signal row whose price history covers its date.
    pub async fn calculate_returns(&self, signals: &Frame, holding_period: u32) -> Vec<SignalResult> {
        let mut results = Vec::new();
        let holding = holding_period as usize;

        for row in signals.rows() {
            let symbol = row.first_of(&["股票代码", "代码"]).map(cell_text).unwrap_or_default();
            let date = row.first_of(&["交易日期", "日期"]).map(cell_text).unwrap_or_default();
            let signal_type = row
                .get("信号类型")
                .filter(|v| !v.is_null())
                .map(cell_text)
                .unwrap_or_else(|| "unknown".to_string());

            let sym = normalize_a_symbol(&symbol);
            if sym.is_empty() {
                continue;
            }
            let Some(d0) = parse_signal_date(&date) else {
                continue;
            };
            let window = ChronoDuration::days(i64::from(holding_period.saturating_mul(3).max(30)));
            let d0_text = d0.format("%Y-%m-%d").to_string();
            let d1_text = (d0 + window).format("%Y-%m-%d").to_string();

            let prices = match self.get_price_history(&sym, &d0_text, &d1_text).await {
                Ok(p) if !p.is_empty() => p,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(symbol = %sym, error = %e, "backtest_price_unavailable");
                    continue;
                }
            };
            let Some(series) = close_series(prices) else {
                continue;
            };

            let Some(entry_i) = series.iter().position(|(d, _)| d.as_str() >= d0_text.as_str()) else {
                continue;
            };
            let exit_i = (entry_i + holding).min(series.len() - 1);
            let (Some(entry_price), Some(exit_price)) = (series[entry_i].1, series[exit_i].1) else {
                continue;
            };
            if entry_price <= 0.0 {
                continue;
            }

            let mut peak = f64::NEG_INFINITY;
            let mut max_drawdown = 0.0f64;
            for close in series[entry_i..=exit_i].iter().filter_map(|(_, c)| *c) {
                peak = peak.max(close);
                if peak > 0.0 {
                    max_drawdown = max_drawdown.min((close - peak) / peak);
                }
            }

            results.push(SignalResult {
                date: d0_text,
                symbol: sym,
                signal_type,
                entry_price,
                exit_price,
                return_pct: (exit_price - entry_price) / entry_price,
                max_drawdown,
                holding_days: exit_i - entry_i,
            });
        }
        results
    }

    /// Fetch, clean, apply `rule`, cap at `max_signals`, measure.
    pub async fn run_backtest<R>(
        &self,
        config: &BacktestConfig,
        rule: R,
        data_source: &str,
        kwargs: &Map<String, Value>,
    ) -> Result<BacktestResult>
    where
        R: FnOnce(&Frame, &Map<String, Value>) -> Result<Frame>,
    {
        let raw = self
            .get_historical_data(data_source, &config.start_date, &config.end_date, kwargs)
            .await?;
        let cleaned = Self::clean_data(&raw);
        let signals = apply_rule(rule, &cleaned, &config.thresholds, config.max_signals)?;
        if signals.is_empty() {
            return Ok(BacktestResult::new(config.clone(), Vec::new()));
        }
        let results = self.calculate_returns(&signals, config.holding_period).await;
        Ok(BacktestResult::new(config.clone(), results))
    }
}

/// Runs a rule with panic recovery and applies the signal cap.
pub fn apply_rule<R>(
    rule: R,
    frame: &Frame,
    thresholds: &Map<String, Value>,
    max_signals: usize,
) -> Result<Frame>
where
    R: FnOnce(&Frame, &Map<String, Value>) -> Result<Frame>,
{
    let signals = with_recovery(|| rule(frame, thresholds), "backtest_rule")?;
    if max_signals > 0 && signals.len() > max_signals {
        return Ok(signals.head(max_signals));
    }
    Ok(signals)
}

/// `YYYY-MM-DD...` or `YYYYMMDD...`.
fn parse_signal_date(text: &str) -> Option<NaiveDate> {
    let head10: String = text.chars().take(10).collect();
    NaiveDate::parse_from_str(&head10, "%Y-%m-%d").ok().or_else(|| {
        let head8: String = text.chars().take(8).collect();
        NaiveDate::parse_from_str(&head8, "%Y%m%d").ok()
    })
}

/// `(date10, close)` sorted by date, from `日期`/`date` and `收盘`/`close`.
fn close_series(mut prices: Frame) -> Option<Vec<(String, Option<f64>)>> {
    prices.rename("date", "日期");
    prices.rename("close", "收盘");
    if !prices.has_column("日期") || !prices.has_column("收盘") {
        return None;
    }
    prices.map_column("日期", |v| Value::String(cell_text(v).chars().take(10).collect()));
    prices.sort_by_text("日期");
    Some(
        prices
            .rows()
            .map(|r| {
                (
                    r.get("日期").map(cell_text).unwrap_or_default(),
                    r.get("收盘").and_then(cell_f64),
                )
            })
            .collect(),
    )
}

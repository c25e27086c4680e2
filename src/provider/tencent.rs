//! Secondary quote backend: the multi-symbol `qt.gtimg.cn` endpoint.
//!
//! Payload format: `v_sz000001="1~平安银行~000001~10.50~...";` with `~`
//! separated positional fields.

use super::backend::{CallContext, CallError};
use super::proxy::HttpClients;
use crate::types::{ProviderConfig, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

const MIN_FIELDS: usize = 47;

// =============================================================================
// Quote record
// =============================================================================

/// One parsed quote. Market caps are converted from 亿 to 元.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Quote {
    pub trade_date: Option<String>,
    pub code: String,
    pub name: String,
    pub last: Option<f64>,
    pub change_pct: Option<f64>,
    pub change_amount: Option<f64>,
    pub volume: Option<i64>,
    pub amount: Option<f64>,
    pub amplitude_pct: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub open: Option<f64>,
    pub prev_close: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub turnover_pct: Option<f64>,
    pub pe_dynamic: Option<f64>,
    pub pb: Option<f64>,
    pub total_mv: Option<f64>,
    pub float_mv: Option<f64>,
    pub five_min_change_pct: Option<f64>,
    pub change_60d_pct: Option<f64>,
    pub change_ytd_pct: Option<f64>,
}

impl Quote {
    /// Spot-table record, in the column order of the primary backend.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("trade_date".into(), opt(self.trade_date.clone()));
        row.insert("代码".into(), Value::String(self.code.clone()));
        row.insert("名称".into(), Value::String(self.name.clone()));
        row.insert("最新价".into(), opt(self.last));
        row.insert("涨跌幅".into(), opt(self.change_pct));
        row.insert("涨跌额".into(), opt(self.change_amount));
        row.insert("成交量".into(), opt(self.volume));
        row.insert("成交额".into(), opt(self.amount));
        row.insert("振幅".into(), opt(self.amplitude_pct));
        row.insert("最高".into(), opt(self.high));
        row.insert("最低".into(), opt(self.low));
        row.insert("今开".into(), opt(self.open));
        row.insert("昨收".into(), opt(self.prev_close));
        row.insert("量比".into(), opt(self.volume_ratio));
        row.insert("换手率".into(), opt(self.turnover_pct));
        row.insert("市盈率-动态".into(), opt(self.pe_dynamic));
        row.insert("市净率".into(), opt(self.pb));
        row.insert("总市值".into(), opt(self.total_mv));
        row.insert("流通市值".into(), opt(self.float_mv));
        row.insert("涨速".into(), Value::Null);
        row.insert("5分钟涨跌".into(), opt(self.five_min_change_pct));
        row.insert("60日涨跌幅".into(), opt(self.change_60d_pct));
        row.insert("年初至今涨跌幅".into(), opt(self.change_ytd_pct));
        row
    }

    /// Valuation record approximating the indicator table.
    pub fn to_indicator_record(&self, fallback_symbol: &str) -> Map<String, Value> {
        let symbol = if self.code.is_empty() {
            fallback_symbol
        } else {
            &self.code
        };
        let mut row = Map::new();
        row.insert("trade_date".into(), opt(self.trade_date.clone()));
        row.insert("pe".into(), opt(self.pe_dynamic));
        row.insert("pe_ttm".into(), opt(self.pe_dynamic));
        row.insert("pb".into(), opt(self.pb));
        for key in ["ps", "ps_ttm", "dv_ratio", "dv_ttm"] {
            row.insert(key.into(), Value::Null);
        }
        row.insert("total_mv".into(), opt(self.total_mv));
        row.insert("symbol".into(), Value::String(symbol.to_string()));
        row.insert("name".into(), Value::String(self.name.clone()));
        row
    }
}

fn opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}

fn float_field(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn int_field(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| float_field(s).map(|f| f.trunc() as i64))
}

/// Parse one `~`-delimited payload. Returns `None` when too short.
pub fn parse_quote_payload(payload: &str) -> Option<Quote> {
    let fields: Vec<&str> = payload.split('~').collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }
    let at = |i: usize| fields.get(i).copied().unwrap_or("");

    let amount = {
        let parts: Vec<&str> = at(35).split('/').collect();
        if parts.len() >= 3 {
            float_field(parts[2])
        } else {
            None
        }
    };

    // Zero volume falls through to the secondary field.
    let volume = int_field(at(36))
        .filter(|v| *v != 0)
        .or_else(|| int_field(at(6)));

    let ts = at(30).trim();
    let trade_date = match ts.get(..8) {
        Some(day) if day.chars().all(|c| c.is_ascii_digit()) => {
            Some(format!("{}-{}-{}", &day[..4], &day[4..6], &day[6..8]))
        }
        _ => None,
    };

    Some(Quote {
        trade_date,
        code: at(2).trim().to_string(),
        name: at(1).trim().to_string(),
        last: float_field(at(3)),
        prev_close: float_field(at(4)),
        open: float_field(at(5)),
        change_amount: float_field(at(31)),
        change_pct: float_field(at(32)),
        high: float_field(at(33)),
        low: float_field(at(34)),
        amount,
        volume,
        amplitude_pct: float_field(at(43)),
        turnover_pct: float_field(at(38)),
        pe_dynamic: float_field(at(39)),
        total_mv: float_field(at(44)).map(|v| v * 1e8),
        float_mv: float_field(at(45)).map(|v| v * 1e8),
        pb: float_field(at(46)),
        volume_ratio: float_field(at(49)),
        five_min_change_pct: float_field(at(69)),
        change_60d_pct: float_field(at(70)),
        change_ytd_pct: float_field(at(71)),
    })
}

/// Split a multi-symbol response into `symbol → quote`. Malformed parts are
/// skipped, as are quotes without a code.
pub fn parse_quote_response(text: &str) -> HashMap<String, Quote> {
    let mut out = HashMap::new();
    for part in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((left, rest)) = part.split_once("=\"") else {
            continue;
        };
        let payload = match rest.rfind('"') {
            Some(end) => &rest[..end],
            None => rest,
        };
        let symbol = left.trim();
        let symbol = symbol.strip_prefix("v_").unwrap_or(symbol);
        if let Some(quote) = parse_quote_payload(payload) {
            if !quote.code.is_empty() {
                out.insert(symbol.to_string(), quote);
            }
        }
    }
    out
}

// =============================================================================
// Quote source
// =============================================================================

/// Merged result of a batched quote fan-out.
#[derive(Debug, Clone, Default)]
pub struct QuoteFetch {
    pub quotes: HashMap<String, Quote>,
    /// One message per failed batch.
    pub failures: Vec<String>,
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Quotes for exchange-prefixed symbols. Fails only when every batch failed.
    async fn fetch_quotes(
        &self,
        symbols: &[String],
        ctx: CallContext,
    ) -> std::result::Result<QuoteFetch, CallError>;
}

/// Live implementation over HTTP.
#[derive(Debug, Clone)]
pub struct TencentQuotes {
    url: String,
    clients: HttpClients,
    batch_size: usize,
    batch_sleep: Duration,
}

impl TencentQuotes {
    pub fn new(url: impl Into<String>, clients: HttpClients, batch_size: usize, batch_sleep: Duration) -> Self {
        Self {
            url: url.into(),
            clients,
            batch_size: batch_size.max(1),
            batch_sleep,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self::new(
            config.quote_url.clone(),
            HttpClients::new(&config.ua)?,
            config.tx_batch_size,
            config.batch_sleep(),
        ))
    }

    async fn fetch_batch(
        &self,
        batch: &[String],
        ctx: CallContext,
    ) -> std::result::Result<HashMap<String, Quote>, CallError> {
        let response = self
            .clients
            .client(ctx.proxy)
            .get(format!("{}{}", self.url, batch.join(",")))
            .timeout(ctx.timeout)
            .send()
            .await?
            .error_for_status()?;
        let text = response.text().await?;
        Ok(parse_quote_response(&text))
    }
}

#[async_trait]
impl QuoteSource for TencentQuotes {
    async fn fetch_quotes(
        &self,
        symbols: &[String],
        ctx: CallContext,
    ) -> std::result::Result<QuoteFetch, CallError> {
        let mut fetch = QuoteFetch::default();
        let mut last_error = None;
        let mut succeeded = 0usize;

        for batch in symbols.chunks(self.batch_size) {
            match self.fetch_batch(batch, ctx).await {
                Ok(quotes) => {
                    succeeded += 1;
                    fetch.quotes.extend(quotes);
                }
                Err(err) => {
                    fetch.failures.push(format!(
                        "quote batch {}..{} failed: {}",
                        batch.first().map(String::as_str).unwrap_or_default(),
                        batch.last().map(String::as_str).unwrap_or_default(),
                        err
                    ));
                    last_error = Some(err);
                }
            }
            if !self.batch_sleep.is_zero() {
                tokio::time::sleep(self.batch_sleep).await;
            }
        }

        match last_error {
            Some(err) if succeeded == 0 => Err(err),
            _ => Ok(fetch),
        }
    }
}

//! The resilient data provider.
//!
//! Validation failures and unknown tools return `Err` before any network
//! attempt. Every other outcome, including exhausted retries, comes back as a
//! populated [`ToolResult`].

use super::backend::{Backend, CallContext, CallError, HttpBackend};
use super::cache::ResponseCache;
use super::envelope::{ToolMeta, ToolResult};
use super::proxy::{ProxyDecision, ProxyPolicy};
use super::retry::RetryPolicy;
use super::routes::{Route, StubApprox, Universe};
use super::symbols::{normalize_yyyymmdd, tx_prefix_symbol, zfill6};
use super::tencent::{QuoteSource, TencentQuotes};
use super::{CallOptions, ToolProvider};
use crate::health::HealthMonitor;
use crate::tools::ToolRegistry;
use crate::types::{Config, Error, Result, Secrets};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Known-degraded upstream condition: the notice table has no `代码`
/// column on days without notices.
const NOTICE_REPORT: &str = "stock_notice_report";

/// Reported by tools that have no viable backend.
const STUB_UNAVAILABLE: &str = "not available from the remote backend; returning empty result";

pub struct DataProvider {
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn Backend>,
    quotes: Arc<dyn QuoteSource>,
    monitor: Option<Arc<HealthMonitor>>,
    cache: ResponseCache,
    proxy: ProxyPolicy,
    retry: RetryPolicy,
    default_timeout: Duration,
    smoke: bool,
    secrets: Secrets,
}

impl std::fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProvider")
            .field("tools", &self.registry.len())
            .field("retry", &self.retry)
            .field("smoke", &self.smoke)
            .finish_non_exhaustive()
    }
}

impl DataProvider {
    /// Provider over explicit backends. Cache is off until [`Self::with_cache`].
    pub fn new(
        registry: Arc<ToolRegistry>,
        backend: Arc<dyn Backend>,
        quotes: Arc<dyn QuoteSource>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            backend,
            quotes,
            monitor: None,
            cache: ResponseCache::disabled(),
            proxy: ProxyPolicy::from_config(&config.provider),
            retry: RetryPolicy::from_config(&config.provider),
            default_timeout: config.provider.timeout(),
            smoke: config.provider.smoke,
            secrets: config.secrets.clone(),
        }
    }

    /// Live provider: HTTP bridge, quote endpoint and the on-disk cache.
    pub fn from_config(
        registry: Arc<ToolRegistry>,
        config: &Config,
        monitor: Option<Arc<HealthMonitor>>,
    ) -> Result<Self> {
        let backend = Arc::new(HttpBackend::from_config(&config.provider)?);
        let quotes = Arc::new(TencentQuotes::from_config(&config.provider)?);
        let cache = ResponseCache::new(
            config.provider.cache_dir.join("responses"),
            config.provider.cache_enabled,
        );
        let mut provider = Self::new(registry, backend, quotes, config).with_cache(cache);
        provider.monitor = monitor;
        Ok(provider)
    }

    pub fn with_monitor(mut self, monitor: Arc<HealthMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_proxy_policy(mut self, proxy: ProxyPolicy) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn monitor(&self) -> Option<&Arc<HealthMonitor>> {
        self.monitor.as_ref()
    }

    fn timeout_for(&self, args: &Map<String, Value>) -> Duration {
        args.get("timeout")
            .and_then(Value::as_f64)
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(self.default_timeout)
    }

    async fn dispatch(
        &self,
        name: &str,
        route: Route,
        converted: &Map<String, Value>,
    ) -> ToolResult {
        // Smoke stubs never touch the network, so skip the proxy probe.
        let proxy = if route == Route::SmokeStub {
            ProxyDecision::Direct
        } else {
            self.proxy.decide().await
        };
        let ctx = CallContext {
            timeout: self.timeout_for(converted),
            proxy,
        };
        if route.is_substituted() {
            tracing::debug!(tool = name, route = ?route, "backend_substituted");
        }

        let empty = Map::new();
        let started = Instant::now();
        let (meta, outcome) = match route {
            Route::SmokeStub => (
                ToolMeta::new("smoke_stub", name)
                    .with_backend("smoke_stub")
                    .with_params(converted.clone()),
                Ok((json!([]), Vec::new())),
            ),
            Route::SpotQuotes(universe) => (
                ToolMeta::new("tencent", universe.function_label())
                    .with_backend(universe.backend_label())
                    .with_params(Map::new()),
                self.retry
                    .run(name, || self.spot_quotes(universe, ctx))
                    .await,
            ),
            Route::HistoryTx => (
                ToolMeta::new("akshare+tencent", "stock_zh_a_hist_tx")
                    .with_backend("tencent_hist_tx")
                    .with_params(pick(converted, &["symbol", "start_date", "end_date", "adjust"])),
                self.retry
                    .run(name, || self.history_tx(converted, ctx))
                    .await
                    .map(|data| (data, Vec::new())),
            ),
            Route::IndicatorApprox => (
                ToolMeta::new("tencent", "qt.gtimg.cn (single-quote)")
                    .with_backend("tencent_indicator_approx")
                    .with_params(pick(converted, &["symbol"])),
                self.retry
                    .run(name, || self.indicator_approx(converted, ctx))
                    .await
                    .map(|data| (data, Vec::new())),
            ),
            Route::Renamed {
                target,
                backend,
                echo_symbol,
            } => {
                let params = if echo_symbol {
                    pick(converted, &["symbol"])
                } else {
                    Map::new()
                };
                (
                    ToolMeta::new("akshare+ths", target)
                        .with_backend(backend)
                        .with_params(params),
                    self.retry
                        .run(name, || self.backend.call(target, &empty, ctx))
                        .await
                        .map(|data| (data, Vec::new())),
                )
            }
            Route::Stub(approx) => {
                let meta = ToolMeta::new("fallback", name)
                    .with_backend("stub_or_approx")
                    .with_params(converted.clone());
                let outcome = match self.stub_approx(approx, converted, ctx).await {
                    Ok(_) if approx == StubApprox::None => {
                        let elapsed = started.elapsed().as_secs_f64();
                        return ToolResult::failed(
                            meta.with_elapsed(elapsed),
                            json!([]),
                            format!("{}: {}", name, STUB_UNAVAILABLE),
                        );
                    }
                    Ok(data) => Ok((data, Vec::new())),
                    // Stubs keep non-null data even when the approximation fails.
                    Err(err) => {
                        let elapsed = started.elapsed().as_secs_f64();
                        return ToolResult::failed(meta.with_elapsed(elapsed), json!([]), err.to_string());
                    }
                };
                (meta, outcome)
            }
            Route::Generic => {
                let call_args = declared_args(&self.registry, name, converted);
                let meta = ToolMeta::new("akshare", name).with_params(call_args.clone());
                let outcome = self
                    .retry
                    .run(name, || self.backend.call(name, &call_args, ctx))
                    .await;
                let outcome = match outcome {
                    Err(err) if name == NOTICE_REPORT && err.message().contains("'代码'") => {
                        Ok(json!([]))
                    }
                    other => other,
                };
                (meta, outcome.map(|data| (data, Vec::new())))
            }
        };

        let elapsed = if route == Route::SmokeStub {
            0.0
        } else {
            started.elapsed().as_secs_f64()
        };
        let meta = meta.with_elapsed(elapsed);
        match outcome {
            Ok((data, warnings)) => ToolResult {
                meta,
                data,
                warnings,
                errors: Vec::new(),
            },
            Err(err) => ToolResult::failed(meta, Value::Null, err.to_string()),
        }
    }

    async fn spot_quotes(
        &self,
        universe: Universe,
        ctx: CallContext,
    ) -> std::result::Result<(Value, Vec<String>), CallError> {
        let (code_tool, column) = universe.code_source();
        let listing = self.backend.call(code_tool, &Map::new(), ctx).await?;
        let symbols: Vec<String> = column_values(&listing, column)
            .iter()
            .map(|code| tx_prefix_symbol(&zfill6(code)))
            .collect();

        let fetch = self.quotes.fetch_quotes(&symbols, ctx).await?;
        let mut rows = Vec::with_capacity(fetch.quotes.len());
        for symbol in &symbols {
            let Some(quote) = fetch.quotes.get(symbol) else {
                continue;
            };
            let mut row = Map::new();
            row.insert("序号".into(), Value::from(rows.len() + 1));
            let mut record = quote.to_record();
            record.remove("trade_date");
            row.extend(record);
            rows.push(Value::Object(row));
        }
        Ok((Value::Array(rows), fetch.failures))
    }

    async fn history_tx(
        &self,
        converted: &Map<String, Value>,
        ctx: CallContext,
    ) -> std::result::Result<Value, CallError> {
        let mut args = Map::new();
        args.insert(
            "symbol".into(),
            Value::String(tx_prefix_symbol(str_arg(converted, "symbol").unwrap_or_default())),
        );
        args.insert(
            "start_date".into(),
            Value::String(normalize_yyyymmdd(str_arg(converted, "start_date"), "19000101")),
        );
        args.insert(
            "end_date".into(),
            Value::String(normalize_yyyymmdd(str_arg(converted, "end_date"), "20500101")),
        );
        args.insert(
            "adjust".into(),
            Value::String(str_arg(converted, "adjust").unwrap_or_default().to_string()),
        );
        self.backend.call("stock_zh_a_hist_tx", &args, ctx).await
    }

    async fn indicator_approx(
        &self,
        converted: &Map<String, Value>,
        ctx: CallContext,
    ) -> std::result::Result<Value, CallError> {
        let symbol = str_arg(converted, "symbol").unwrap_or_default().trim();
        if symbol.is_empty() || symbol.eq_ignore_ascii_case("all") {
            return self
                .backend
                .call("stock_info_a_code_name", &Map::new(), ctx)
                .await;
        }

        let prefixed = tx_prefix_symbol(&zfill6(symbol));
        let fetch = self
            .quotes
            .fetch_quotes(std::slice::from_ref(&prefixed), ctx)
            .await?;
        let quote = fetch
            .quotes
            .get(&prefixed)
            .ok_or_else(|| CallError::Fatal(format!("No quote returned for {}", prefixed)))?;
        Ok(json!([quote.to_indicator_record(symbol)]))
    }

    async fn stub_approx(
        &self,
        approx: StubApprox,
        converted: &Map<String, Value>,
        ctx: CallContext,
    ) -> std::result::Result<Value, CallError> {
        match approx {
            StubApprox::None => Ok(json!([])),
            StubApprox::FinancialAbstract => {
                let symbol = str_arg(converted, "symbol")
                    .filter(|s| !s.is_empty())
                    .unwrap_or("000001");
                let mut args = Map::new();
                args.insert("symbol".into(), Value::String(symbol.to_string()));
                self.backend
                    .call("stock_financial_abstract_ths", &args, ctx)
                    .await
            }
            StubApprox::SectorFundFlow => {
                let mut args = Map::new();
                args.insert("symbol".into(), Value::String("即时".into()));
                self.backend.call("stock_fund_flow_industry", &args, ctx).await
            }
            StubApprox::BeijingCodes => {
                self.backend
                    .call("stock_info_bj_name_code", &Map::new(), ctx)
                    .await
            }
        }
    }
}

#[async_trait]
impl ToolProvider for DataProvider {
    async fn call_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
        options: &CallOptions,
    ) -> Result<ToolResult> {
        let descriptor = self
            .registry
            .describe(name)
            .ok_or_else(|| Error::not_found(format!("Unknown tool: {}", name)))?;
        let converted = descriptor
            .parameters
            .validate_and_convert(args, &self.secrets)?;
        let route = Route::resolve(name, self.smoke);
        let cacheable = route != Route::SmokeStub;

        if cacheable && !options.refresh {
            if let Some(mut hit) = self.cache.load(name, &converted).await {
                hit.meta.cache = Some("hit".to_string());
                hit.meta.script = options.script.clone();
                return Ok(hit);
            }
        }

        let mut result = self.dispatch(name, route, &converted).await;
        result.meta.script = options.script.clone();
        result.meta.description = descriptor.description.clone();

        if let Some(monitor) = &self.monitor {
            monitor
                .record_call(name, result.is_ok(), result.errors.first().map(String::as_str))
                .await;
        }

        if result.is_ok() {
            if cacheable {
                if let Err(err) = self.cache.save(name, &converted, &result).await {
                    tracing::warn!(tool = name, error = %err, "response_cache_write_failed");
                }
            }
        } else {
            tracing::warn!(tool = name, errors = ?result.errors, "tool_call_failed");
        }
        Ok(result)
    }
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn pick(args: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .map(|k| (k.to_string(), args.get(*k).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Keep only arguments the tool's schema declares. Tools declaring nothing
/// receive everything.
fn declared_args(registry: &ToolRegistry, name: &str, converted: &Map<String, Value>) -> Map<String, Value> {
    let Some(descriptor) = registry.describe(name) else {
        return converted.clone();
    };
    if descriptor.parameters.properties.is_empty() {
        return converted.clone();
    }
    converted
        .iter()
        .filter(|(k, _)| descriptor.parameters.declares(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// String values of `column` across an array of records.
pub(crate) fn column_values(records: &Value, column: &str) -> Vec<String> {
    records
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(|row| match row.get(column)? {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

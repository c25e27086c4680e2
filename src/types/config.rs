//! Configuration structures.
//!
//! Configuration is assembled from serialized defaults overlaid with
//! `FINSKILLS_*` environment variables and the `XUEQIU_TOKEN` secret.

use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::{Error, Result};

/// Environment variable prefix for every documented setting.
pub const ENV_PREFIX: &str = "FINSKILLS_";

/// Global service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Data provider behaviour (timeouts, retries, proxies, backends).
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Health monitor thresholds.
    #[serde(default)]
    pub health: HealthSettings,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Process-wide secrets auto-filled into tool parameters.
    #[serde(default)]
    pub secrets: Secrets,
}

impl Config {
    /// Defaults plus environment overrides.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// Extract and validate.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall every call or pin the monitor degraded.
    pub fn validate(&self) -> Result<()> {
        let timeout = self.provider.default_timeout;
        if !(timeout.is_finite() && timeout > 0.0) {
            return Err(Error::config(format!(
                "default_timeout must be a positive number of seconds, got {}",
                timeout
            )));
        }
        if self.health.degradation_threshold < 1 {
            return Err(Error::config("degradation_threshold must be at least 1"));
        }
        Ok(())
    }

    /// The layered figment used by [`Config::load`]. Exposed so callers can
    /// merge additional sources (CLI flags, tests) before extracting.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                let key = key.as_str().to_ascii_lowercase();
                match section_for(&key) {
                    Some(section) => format!("{section}.{key}").into(),
                    None => key.into(),
                }
            }))
            .merge(
                Env::raw()
                    .only(&["XUEQIU_TOKEN"])
                    .map(|_| "secrets.xueqiu_token".into()),
            )
    }
}

/// Which config section a flat `FINSKILLS_*` key belongs to.
fn section_for(key: &str) -> Option<&'static str> {
    match key {
        "default_timeout" | "call_retries" | "call_retry_sleep" | "proxy_mode"
        | "force_no_proxy" | "smoke" | "tx_batch_size" | "tx_sleep" | "ua" | "backend_url"
        | "quote_url" | "cache_dir" | "cache_enabled" => Some("provider"),
        "health_check_interval" | "degradation_threshold" | "degradation_window" => {
            Some("health")
        }
        "listen_addr" | "max_concurrent_runs" | "view_parallelism" => Some("server"),
        _ => None,
    }
}

/// Data provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Per-call network timeout in seconds.
    pub default_timeout: f64,
    /// Retries after the first attempt.
    pub call_retries: u32,
    /// Linear backoff unit in seconds.
    pub call_retry_sleep: f64,
    /// `off` (default) disables proxies, `on` keeps the environment's proxies.
    pub proxy_mode: String,
    /// Force direct connections regardless of `proxy_mode`.
    pub force_no_proxy: bool,
    /// Smoke mode: stub very heavy endpoints.
    pub smoke: bool,
    /// Symbols per quote request.
    pub tx_batch_size: usize,
    /// Delay between quote batches in seconds.
    pub tx_sleep: f64,
    /// User agent for the quote backend.
    pub ua: String,
    /// Base URL of the generic tool backend.
    pub backend_url: String,
    /// Multi-symbol quote endpoint.
    pub quote_url: String,
    /// Provider response cache directory.
    pub cache_dir: PathBuf,
    /// Provider response cache on/off.
    pub cache_enabled: bool,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.default_timeout)
    }

    pub fn retry_sleep(&self) -> Duration {
        secs(self.call_retry_sleep)
    }

    pub fn batch_sleep(&self) -> Duration {
        secs(self.tx_sleep)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default_timeout: 10.0,
            call_retries: 1,
            call_retry_sleep: 0.3,
            proxy_mode: "off".to_string(),
            force_no_proxy: false,
            smoke: false,
            tx_batch_size: 200,
            tx_sleep: 0.05,
            ua: "Mozilla/5.0".to_string(),
            backend_url: "http://127.0.0.1:8080".to_string(),
            quote_url: "https://qt.gtimg.cn/q=".to_string(),
            cache_dir: PathBuf::from("cache"),
            cache_enabled: true,
        }
    }
}

/// Health monitor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Freshness window for the cached probe, in seconds.
    pub health_check_interval: f64,
    /// Consecutive global failures that trigger degradation.
    pub degradation_threshold: u32,
    /// Reported alongside the threshold; failures do not age out.
    pub degradation_window: f64,
}

impl HealthSettings {
    pub fn check_interval(&self) -> Duration {
        secs(self.health_check_interval)
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            health_check_interval: 300.0,
            degradation_threshold: 5,
            degradation_window: 300.0,
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub listen_addr: String,

    /// Concurrent `/run` requests. Further requests wait for a slot.
    pub max_concurrent_runs: usize,

    /// Concurrent steps inside one custom view (results keep plan order).
    pub view_parallelism: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8808".to_string(),
            max_concurrent_runs: 16,
            view_parallelism: 1,
        }
    }
}

/// Secrets sourced from the process environment.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct Secrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xueqiu_token: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("xueqiu_token", &self.xueqiu_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

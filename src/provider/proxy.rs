//! Per-call proxy avoidance.
//!
//! Environments often export `HTTP(S)_PROXY` pointing at a local port that is
//! not running. Instead of editing the process environment around a call,
//! every call picks one of two pre-built clients: a direct one that ignores
//! proxy variables, or one that honours them.

use crate::types::{ProviderConfig, Result};
use std::time::Duration;
use tokio::net::TcpStream;

const LOCAL_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

const PROXY_VARS: [(&str, &str); 2] = [("HTTP_PROXY", "http_proxy"), ("HTTPS_PROXY", "https_proxy")];

/// Which client a call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyDecision {
    /// Ignore every proxy variable.
    Direct,
    /// Honour the environment's proxy configuration.
    Environment,
}

/// Inputs to the per-call proxy decision, captured once at startup.
#[derive(Debug, Clone)]
pub struct ProxyPolicy {
    disabled_by_config: bool,
    proxies: Vec<String>,
}

impl ProxyPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        let proxies = PROXY_VARS
            .iter()
            .filter_map(|(upper, lower)| {
                std::env::var(upper)
                    .ok()
                    .filter(|v| !v.is_empty())
                    .or_else(|| std::env::var(lower).ok().filter(|v| !v.is_empty()))
            })
            .collect();
        Self::new(&config.proxy_mode, config.force_no_proxy, proxies)
    }

    /// `force_no_proxy` wins over any `proxy_mode`. Unknown modes keep proxies.
    pub fn new(proxy_mode: &str, force_no_proxy: bool, proxies: Vec<String>) -> Self {
        let mode = proxy_mode.trim().to_lowercase();
        let mode_disables = matches!(
            mode.as_str(),
            "off" | "disable" | "disabled" | "0" | "false" | "no" | "n"
        );
        Self {
            disabled_by_config: force_no_proxy || mode_disables,
            proxies,
        }
    }

    /// Decide for one call. Probes local proxies, so it is async.
    pub async fn decide(&self) -> ProxyDecision {
        if self.disabled_by_config {
            return ProxyDecision::Direct;
        }
        for proxy in &self.proxies {
            if is_local_proxy_unreachable(proxy).await {
                tracing::info!(proxy = %proxy, "proxy_disabled");
                return ProxyDecision::Direct;
            }
        }
        ProxyDecision::Environment
    }
}

/// True only for a `127.0.0.1`/`localhost` proxy that refuses a TCP connect
/// within 200 ms. Remote proxies are never probed.
pub async fn is_local_proxy_unreachable(proxy_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(proxy_url) else {
        return true;
    };
    let (Some(host), Some(port)) = (url.host_str(), url.port()) else {
        return false;
    };
    if host != "127.0.0.1" && host != "localhost" {
        return false;
    }
    !matches!(
        tokio::time::timeout(LOCAL_PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// The two HTTP clients a backend chooses between.
#[derive(Debug, Clone)]
pub struct HttpClients {
    direct: reqwest::Client,
    environment: reqwest::Client,
}

impl HttpClients {
    pub fn new(user_agent: &str) -> Result<Self> {
        Ok(Self {
            direct: reqwest::Client::builder()
                .user_agent(user_agent)
                .no_proxy()
                .build()?,
            environment: reqwest::Client::builder().user_agent(user_agent).build()?,
        })
    }

    pub fn client(&self, decision: ProxyDecision) -> &reqwest::Client {
        match decision {
            ProxyDecision::Direct => &self.direct,
            ProxyDecision::Environment => &self.environment,
        }
    }
}

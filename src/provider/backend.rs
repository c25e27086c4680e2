//! Physical data backends and the tagged call outcome.

use super::proxy::{HttpClients, ProxyDecision};
use crate::types::{ProviderConfig, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Transient network failure signatures. Only these are retried.
pub const RETRYABLE_SIGNATURES: &[&str] = &[
    "RemoteDisconnected",
    "Connection aborted",
    "Read timed out",
    "Max retries exceeded",
    "UNEXPECTED_EOF_WHILE_READING",
    "SSLEOFError",
    "SSLV3_ALERT_HANDSHAKE_FAILURE",
    "connection reset",
    "connection closed",
    "timed out",
    "unexpected eof",
    "handshake",
];

/// Outcome of one failed backend attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Fatal(String),
}

impl CallError {
    /// Tag a raw error message by the allow-list.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_retryable_message(&message) {
            CallError::Retryable(message)
        } else {
            CallError::Fatal(message)
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CallError::Retryable(m) | CallError::Fatal(m) => m,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::Retryable(_))
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CallError::Retryable(format!("Read timed out: {}", err))
        } else if err.is_connect() {
            CallError::Retryable(format!("Connection aborted: {}", err))
        } else {
            CallError::from_message(err.to_string())
        }
    }
}

pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_SIGNATURES
        .iter()
        .any(|sig| message.contains(sig) || lower.contains(&sig.to_lowercase()))
}

/// Per-call transport settings.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub timeout: Duration,
    pub proxy: ProxyDecision,
}

/// A backend that executes a named data function and returns JSON records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(
        &self,
        function: &str,
        args: &Map<String, Value>,
        ctx: CallContext,
    ) -> std::result::Result<Value, CallError>;
}

// =============================================================================
// HTTP bridge backend
// =============================================================================

/// Calls `GET {base}/api/public/{function}?{args}` on an HTTP data bridge.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    clients: HttpClients,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, clients: HttpClients) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            clients,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self::new(
            config.backend_url.clone(),
            HttpClients::new(&config.ua)?,
        ))
    }

    fn url(&self, function: &str) -> String {
        format!("{}/api/public/{}", self.base_url, function)
    }
}

/// Flatten arguments into query pairs. Nulls are omitted.
pub(crate) fn query_pairs(args: &Map<String, Value>) -> Vec<(String, String)> {
    args.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), rendered)
        })
        .collect()
}

#[async_trait]
impl Backend for HttpBackend {
    async fn call(
        &self,
        function: &str,
        args: &Map<String, Value>,
        ctx: CallContext,
    ) -> std::result::Result<Value, CallError> {
        let response = self
            .clients
            .client(ctx.proxy)
            .get(self.url(function))
            .query(&query_pairs(args))
            .timeout(ctx.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("detail")
                        .or_else(|| v.get("error"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(body);
            return Err(CallError::from_message(format!(
                "HTTP {}: {}",
                status.as_u16(),
                detail
            )));
        }

        response.json::<Value>().await.map_err(CallError::from)
    }
}

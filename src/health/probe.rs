use super::monitor::HealthProbe;
use crate::provider::backend::{Backend, CallContext};
use crate::provider::proxy::ProxyPolicy;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Stable, fast operation used to test backend connectivity.
pub const PROBE_FUNCTION: &str = "stock_info_a_code_name";

/// Probes the generic backend with the code-list call.
pub struct BackendProbe {
    backend: Arc<dyn Backend>,
    proxy: ProxyPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for BackendProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendProbe")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BackendProbe {
    pub fn new(backend: Arc<dyn Backend>, proxy: ProxyPolicy, timeout: Duration) -> Self {
        Self {
            backend,
            proxy,
            timeout,
        }
    }
}

#[async_trait]
impl HealthProbe for BackendProbe {
    async fn probe(&self) -> std::result::Result<usize, String> {
        let ctx = CallContext {
            timeout: self.timeout,
            proxy: self.proxy.decide().await,
        };
        let data = self
            .backend
            .call(PROBE_FUNCTION, &Map::new(), ctx)
            .await
            .map_err(|e| e.to_string())?;
        Ok(match data {
            Value::Array(rows) => rows.len(),
            Value::Null => 0,
            Value::Object(map) => map.len(),
            _ => 1,
        })
    }
}

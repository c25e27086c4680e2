//! Data provider: validated, resilient execution of named data operations.
//!
//! ```text
//! call_tool(name, args)
//!   ├─ registry lookup + parameter coercion   (Err on failure, no I/O)
//!   ├─ response cache                          (skipped on refresh)
//!   ├─ route: spot / history / indicator / renamed / stub / generic
//!   │    └─ proxy decision → retry(backend call)
//!   └─ health monitor records the outcome
//! ```

pub mod backend;
pub mod cache;
pub mod data_provider;
pub mod envelope;
pub mod proxy;
pub mod retry;
pub mod routes;
pub mod symbols;
pub mod tencent;

pub use backend::{Backend, CallContext, CallError, HttpBackend};
pub use cache::ResponseCache;
pub use data_provider::DataProvider;
pub use envelope::{ToolMeta, ToolResult};
pub use proxy::{ProxyDecision, ProxyPolicy};
pub use retry::RetryPolicy;
pub use routes::Route;
pub use tencent::{Quote, QuoteFetch, QuoteSource, TencentQuotes};

use crate::types::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Bypass cached responses.
    pub refresh: bool,
    /// Caller label copied into `meta.script`.
    pub script: String,
}

/// Anything that can execute a named tool and return an envelope.
///
/// `Err` is reserved for unknown tools and invalid arguments.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    async fn call_tool(
        &self,
        name: &str,
        args: &Map<String, Value>,
        options: &CallOptions,
    ) -> Result<ToolResult>;
}

//! Core types for the view service.
//!
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Layered configuration for provider, health monitor and server
//! - **IDs**: Run identifiers

mod config;
mod errors;
mod ids;

pub use config::{Config, HealthSettings, ProviderConfig, Secrets, ServerConfig, ENV_PREFIX};
pub use errors::{Error, Result};
pub use ids::RunId;

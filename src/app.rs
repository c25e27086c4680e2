//! Process wiring shared by the binaries.

use crate::health::{BackendProbe, HealthMonitor};
use crate::http::AppState;
use crate::provider::{Backend, DataProvider, HttpBackend, ProxyPolicy};
use crate::tools::ToolRegistry;
use crate::types::{Config, Result};
use crate::views::{discover_custom_views, ViewCatalog};
use std::path::Path;
use std::sync::Arc;

/// Default tool manifest location, relative to the working directory.
pub const DEFAULT_MANIFEST: &str = "config/litellm_tools.json";

/// Everything a running service needs, built once at startup.
#[derive(Debug)]
pub struct App {
    pub config: Config,
    pub registry: Arc<ToolRegistry>,
    pub monitor: Arc<HealthMonitor>,
    pub provider: Arc<DataProvider>,
    pub views: Arc<ViewCatalog>,
}

impl App {
    pub fn build(config: Config, manifest: &Path, views_dir: Option<&Path>) -> Result<Self> {
        let registry = Arc::new(ToolRegistry::load(manifest)?);

        let provider = DataProvider::from_config(registry.clone(), &config, None)?;
        let monitor = Arc::new(monitor_for(&config, provider.backend().clone()));
        let provider = Arc::new(provider.with_monitor(monitor.clone()));

        let views = Arc::new(ViewCatalog::build(&registry, discover_custom_views(views_dir)?));

        tracing::info!(
            tools = registry.len(),
            views = views.len(),
            manifest = %manifest.display(),
            "app_initialized"
        );

        Ok(Self {
            config,
            registry,
            monitor,
            provider,
            views,
        })
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.provider.clone(), self.views.clone(), &self.config.server)
            .with_monitor(self.monitor.clone())
    }
}

/// A health monitor probing the live tool backend. No manifest required.
pub fn health_monitor(config: &Config) -> Result<HealthMonitor> {
    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::from_config(&config.provider)?);
    Ok(monitor_for(config, backend))
}

fn monitor_for(config: &Config, backend: Arc<dyn Backend>) -> HealthMonitor {
    let probe = BackendProbe::new(
        backend,
        ProxyPolicy::from_config(&config.provider),
        config.provider.timeout(),
    );
    HealthMonitor::new(config.health.clone(), Arc::new(probe))
}

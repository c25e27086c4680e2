//! Health monitoring: outcome statistics, degradation state, probes.

pub mod classify;
pub mod monitor;
pub mod probe;
pub mod refresher;

pub use classify::{classify_error, ErrorKind};
pub use monitor::{
    DegradationInfo, ErrorStats, GlobalStatsView, HealthCheckResult, HealthMonitor, HealthProbe,
    HealthSnapshot, HealthSummary,
};
pub use probe::{BackendProbe, PROBE_FUNCTION};
pub use refresher::HealthRefresher;

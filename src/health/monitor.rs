//! Provider health monitor.
//!
//! Per-tool and global failure counters plus an advisory degrade/recover
//! state machine. All counters live behind one coarse lock; the monitor never
//! blocks or alters a call.

use super::classify::classify_error;
use crate::types::HealthSettings;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

// =============================================================================
// Records
// =============================================================================

/// Failure statistics for one tool, or for all calls together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub consecutive_failures: u32,
    pub last_error_time: Option<DateTime<Local>>,
    pub last_error_message: Option<String>,
    /// Failure counts by taxonomy label. Only tracked per tool.
    #[serde(default)]
    pub error_types: BTreeMap<String, u64>,
}

impl ErrorStats {
    /// Percentage of successful calls, two decimals; 100 with no calls.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 100.0;
        }
        let ok = (self.total_calls - self.failed_calls) as f64;
        (ok / self.total_calls as f64 * 100.0 * 100.0).round() / 100.0
    }

    fn record(&mut self, success: bool, error: Option<&str>, track_types: bool) {
        self.total_calls += 1;
        if success {
            self.consecutive_failures = 0;
            return;
        }
        self.failed_calls += 1;
        self.consecutive_failures += 1;
        self.last_error_time = Some(Local::now());
        self.last_error_message = error.map(str::to_string);
        if let (true, Some(error)) = (track_types, error) {
            *self
                .error_types
                .entry(classify_error(error).as_str().to_string())
                .or_default() += 1;
        }
    }
}

/// Outcome of one lightweight probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub is_healthy: bool,
    pub check_time: DateTime<Local>,
    /// Seconds.
    pub response_time: f64,
    pub error: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

/// A cheap call against a known-stable operation. Returns the row count.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> std::result::Result<usize, String>;
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalStatsView {
    pub total_calls: u64,
    pub failed_calls: u64,
    pub success_rate: f64,
    pub consecutive_failures: u32,
    pub last_error_time: Option<DateTime<Local>>,
    pub last_error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationInfo {
    pub is_degraded: bool,
    pub degradation_start_time: Option<DateTime<Local>>,
    pub threshold: u32,
    /// Reported only; failures do not age out.
    pub window_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub is_healthy: Option<bool>,
    pub is_degraded: bool,
    pub last_check_time: Option<DateTime<Local>>,
    pub response_time: Option<f64>,
    pub global_stats: GlobalStatsView,
    pub degradation_info: Option<DegradationInfo>,
}

/// Serializable copy of the monitor's state, for CLI persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    #[serde(default)]
    pub global: ErrorStats,
    #[serde(default)]
    pub tools: BTreeMap<String, ErrorStats>,
    #[serde(default)]
    pub is_degraded: bool,
    #[serde(default)]
    pub degradation_start_time: Option<DateTime<Local>>,
    #[serde(default)]
    pub last_check: Option<HealthCheckResult>,
}

// =============================================================================
// Monitor
// =============================================================================

#[derive(Debug, Default)]
struct MonitorState {
    tools: HashMap<String, ErrorStats>,
    global: ErrorStats,
    degraded: bool,
    degradation_start: Option<DateTime<Local>>,
    last_check: Option<HealthCheckResult>,
}

pub struct HealthMonitor {
    settings: HealthSettings,
    probe: Arc<dyn HealthProbe>,
    state: Mutex<MonitorState>,
    /// Serialises probes so concurrent `check_health` calls share one result.
    probe_gate: Mutex<()>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(settings: HealthSettings, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            settings,
            probe,
            state: Mutex::new(MonitorState::default()),
            probe_gate: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// Record one call outcome and run the degradation state machine.
    pub async fn record_call(&self, tool: &str, success: bool, error: Option<&str>) {
        let mut state = self.state.lock().await;
        state
            .tools
            .entry(tool.to_string())
            .or_default()
            .record(success, error, true);
        state.global.record(success, error, false);

        let consecutive = state.global.consecutive_failures;
        // Thresholds below one behave as one.
        let threshold = self.settings.degradation_threshold.max(1);
        if consecutive >= threshold {
            if !state.degraded {
                state.degraded = true;
                state.degradation_start = Some(Local::now());
                tracing::warn!(
                    consecutive_failures = consecutive,
                    threshold,
                    "degradation_entered"
                );
            }
        } else if state.degraded && consecutive == 0 {
            state.degraded = false;
            state.degradation_start = None;
            tracing::info!("degradation_recovered");
        }
    }

    pub async fn is_degraded(&self) -> bool {
        self.state.lock().await.degraded
    }

    /// Global stats when `tool` is `None`; empty stats for unseen tools.
    pub async fn get_stats(&self, tool: Option<&str>) -> ErrorStats {
        let state = self.state.lock().await;
        match tool {
            None => state.global.clone(),
            Some(name) => state.tools.get(name).cloned().unwrap_or_default(),
        }
    }

    pub async fn get_all_stats(&self) -> BTreeMap<String, ErrorStats> {
        let state = self.state.lock().await;
        state
            .tools
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// `None` clears everything including the degraded flag; a tool name
    /// resets only that tool's counters.
    pub async fn reset_stats(&self, tool: Option<&str>) {
        let mut state = self.state.lock().await;
        match tool {
            None => {
                state.tools.clear();
                state.global = ErrorStats::default();
                state.degraded = false;
                state.degradation_start = None;
            }
            Some(name) => {
                if let Some(stats) = state.tools.get_mut(name) {
                    *stats = ErrorStats::default();
                }
            }
        }
    }

    pub async fn get_health_summary(&self) -> HealthSummary {
        let state = self.state.lock().await;
        let check = state.last_check.as_ref();
        HealthSummary {
            is_healthy: check.map(|c| c.is_healthy),
            is_degraded: state.degraded,
            last_check_time: check.map(|c| c.check_time),
            response_time: check.map(|c| c.response_time),
            global_stats: GlobalStatsView {
                total_calls: state.global.total_calls,
                failed_calls: state.global.failed_calls,
                success_rate: state.global.success_rate(),
                consecutive_failures: state.global.consecutive_failures,
                last_error_time: state.global.last_error_time,
                last_error_message: state.global.last_error_message.clone(),
            },
            degradation_info: state.degraded.then(|| DegradationInfo {
                is_degraded: true,
                degradation_start_time: state.degradation_start,
                threshold: self.settings.degradation_threshold,
                window_seconds: self.settings.degradation_window,
            }),
        }
    }

    /// Replay the cached probe while it is fresh, otherwise probe again.
    pub async fn check_health(&self, force: bool) -> HealthCheckResult {
        let _gate = self.probe_gate.lock().await;
        if !force {
            if let Some(cached) = self.fresh_check().await {
                return cached;
            }
        }

        let result = self.perform_check().await;
        tracing::info!(
            healthy = result.is_healthy,
            response_time = result.response_time,
            error = result.error.as_deref().unwrap_or(""),
            "health_probe"
        );
        self.state.lock().await.last_check = Some(result.clone());
        result
    }

    async fn fresh_check(&self) -> Option<HealthCheckResult> {
        let state = self.state.lock().await;
        let last = state.last_check.as_ref()?;
        let age = (Local::now() - last.check_time).num_milliseconds() as f64 / 1000.0;
        (age < self.settings.health_check_interval).then(|| last.clone())
    }

    async fn perform_check(&self) -> HealthCheckResult {
        let started = Instant::now();
        let outcome = self.probe.probe().await;
        let response_time = started.elapsed().as_secs_f64();

        let (is_healthy, error, details) = match outcome {
            Ok(0) => (
                false,
                Some("empty data".to_string()),
                json!({"data_length": 0}),
            ),
            Ok(rows) => (
                true,
                None,
                json!({
                    "data_length": rows,
                    "response_time_ms": (response_time * 1000.0 * 100.0).round() / 100.0,
                }),
            ),
            Err(message) => {
                let kind = classify_error(&message);
                (false, Some(message), json!({"error_type": kind.as_str()}))
            }
        };

        HealthCheckResult {
            is_healthy,
            check_time: Local::now(),
            response_time,
            error,
            details: details.as_object().cloned().unwrap_or_default(),
        }
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        let state = self.state.lock().await;
        HealthSnapshot {
            global: state.global.clone(),
            tools: state
                .tools
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            is_degraded: state.degraded,
            degradation_start_time: state.degradation_start,
            last_check: state.last_check.clone(),
        }
    }

    pub async fn restore(&self, snapshot: HealthSnapshot) {
        let mut state = self.state.lock().await;
        state.global = snapshot.global;
        state.tools = snapshot.tools.into_iter().collect();
        state.degraded = snapshot.is_degraded;
        state.degradation_start = snapshot.degradation_start_time;
        state.last_check = snapshot.last_check;
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Background health re-probe.
//!
//! Keeps the cached probe result warm for the HTTP surface by forcing a probe
//! every `health_check_interval` until stopped.

use super::monitor::HealthMonitor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug)]
pub struct HealthRefresher {
    monitor: Arc<HealthMonitor>,
    period: Duration,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl HealthRefresher {
    pub fn new(monitor: Arc<HealthMonitor>, period: Duration) -> Self {
        Self {
            monitor,
            period,
            stop_tx: None,
        }
    }

    /// Start the loop in the background. Returns immediately.
    ///
    /// A zero period disables refreshing; the returned task exits at once.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let monitor = self.monitor.clone();
        let period = self.period;
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::spawn(async move {
            if period.is_zero() {
                return;
            }
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let result = monitor.check_health(true).await;
                        if !result.is_healthy {
                            tracing::warn!(
                                error = result.error.as_deref().unwrap_or(""),
                                "health_refresh_unhealthy"
                            );
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("health_refresher_stopped");
                        break;
                    }
                }
            }
        })
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for HealthRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}

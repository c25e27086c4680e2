//! Return-distribution statistics.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestStatistics {
    pub total_signals: usize,
    pub avg_return: f64,
    pub median_return: f64,
    pub win_rate: f64,
    pub profit_loss_ratio: f64,
    pub max_return: f64,
    pub min_return: f64,
    pub sharpe_ratio: f64,
    pub return_25pct: f64,
    pub return_75pct: f64,
}

impl BacktestStatistics {
    /// Every float rounded to 6 decimal places.
    pub fn rounded(&self) -> Self {
        Self {
            total_signals: self.total_signals,
            avg_return: round6(self.avg_return),
            median_return: round6(self.median_return),
            win_rate: round6(self.win_rate),
            profit_loss_ratio: round6(self.profit_loss_ratio),
            max_return: round6(self.max_return),
            min_return: round6(self.min_return),
            sharpe_ratio: round6(self.sharpe_ratio),
            return_25pct: round6(self.return_25pct),
            return_75pct: round6(self.return_75pct),
        }
    }
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// Statistics over per-signal returns. An empty slice gives all zeros.
///
/// Sharpe is mean over population standard deviation (no risk-free rate,
/// not annualised). The profit/loss ratio is 0 when there are no losses.
pub fn analyze_returns(returns: &[f64]) -> BacktestStatistics {
    if returns.is_empty() {
        return BacktestStatistics::default();
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;

    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);

    let wins = returns.iter().filter(|r| **r > 0.0).count() as f64;

    let profits: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
    let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let loss_mean = mean_of(&losses);
    let profit_loss_ratio = match loss_mean {
        Some(l) if l != 0.0 => (mean_of(&profits).unwrap_or(0.0) / l).abs(),
        _ => 0.0,
    };

    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let sharpe_ratio = if std > 0.0 { mean / std } else { 0.0 };

    BacktestStatistics {
        total_signals: returns.len(),
        avg_return: mean,
        median_return: percentile(&sorted, 50.0),
        win_rate: wins / n,
        profit_loss_ratio,
        max_return: sorted[sorted.len() - 1],
        min_return: sorted[0],
        sharpe_ratio,
        return_25pct: percentile(&sorted, 25.0),
        return_75pct: percentile(&sorted, 75.0),
    }
}

fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Linear-interpolated percentile of an ascending slice; `q` in `[0, 100]`.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let pos = (q / 100.0).clamp(0.0, 1.0) * (len - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

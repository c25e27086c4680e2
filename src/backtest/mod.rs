//! Threshold backtests for signal rules.
//!
//! ```text
//! get_historical_data ─► clean_data ─► rule ─► cap ─► calculate_returns ─► statistics
//!        │                                                │
//!        └──────────── FrameCache (.csv.gz) ◄─────────────┘ get_price_history
//! ```

pub mod block_deal;
pub mod cache;
pub mod frame;
pub mod framework;
pub mod stats;

pub use cache::FrameCache;
pub use frame::{Frame, Row};
pub use framework::{
    data_fn, prices_fn, BacktestConfig, BacktestFramework, BacktestResult, DataFetcher,
    PriceFetcher, ProviderFetcher, SignalResult,
};
pub use stats::{analyze_returns, percentile, BacktestStatistics};

//! # View Service - Resilient Financial Data Views
//!
//! Rust implementation of the view service providing:
//! - A tool registry loaded from a JSON manifest of named data operations
//! - A data provider with backend substitution, retry/backoff and a uniform envelope
//! - Advisory health tracking with a degrade/recover state machine
//! - View composition with partial-failure semantics
//! - Signal backtests over a content-addressed `.csv.gz` cache
//! - An HTTP surface for catalogue browsing and view runs
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────────────────────────┐
//!   POST /run    →   │  ViewCatalog ─► run_view            │
//!                    │                    │                │
//!                    │                    ▼                │
//!                    │  DataProvider (ToolProvider)        │
//!                    │  ┌─────────┐ ┌─────────┐ ┌───────┐  │
//!                    │  │ Routes  │ │  Retry  │ │ Cache │  │
//!                    │  └─────────┘ └─────────┘ └───────┘  │
//!                    │        │  outcomes                  │
//!                    │        ▼                            │
//!                    │  HealthMonitor (advisory)           │
//!                    └─────────────────────────────────────┘
//!   backtest CLI →   BacktestFramework ─► FrameCache (.csv.gz)
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod app;
pub mod backtest;
pub mod health;
pub mod http;
pub mod provider;
pub mod tools;
pub mod types;
pub mod views;

// Internal utilities
pub mod observability;
pub mod recovery;

pub use app::App;
pub use types::{Config, Error, Result};

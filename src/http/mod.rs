//! HTTP surface.
//!
//! - `GET /health` liveness
//! - `GET /health/summary` health monitor summary
//! - `GET /views`, `GET /views/{name}` catalogue
//! - `POST /run {name, params, refresh}` run a view

pub mod routes;
pub mod server;

pub use routes::{parse_run_request, ApiError, RunRequest};
pub use server::{cancel_on_ctrl_c, router, serve, AppState};

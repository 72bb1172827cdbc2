//! # murmur-server
//!
//! WebSocket front end for the Murmur chat relay: configuration, the axum
//! endpoint, connection limiting, and Prometheus metrics.

pub mod config;
pub mod handlers;
pub mod limits;
pub mod metrics;

pub use config::Config;
pub use handlers::{build_app, run_server, serve, AppState};

//! # Cadence
//!
//! Cycles engagement actions over ordered target lists through a set of
//! service channels, with bounded retries, cooldown handling, concurrent
//! workers and a cooperative stop.
//!
//! ## Modules
//!
//! - `channel` - The `Channel` trait and its HTTP, browser and simulated adapters
//! - `session` - Lazily created, gated browser sessions per channel
//! - `retry` - Bounded retry, cooldown and circuit breaker policy
//! - `executor` - Routes one action to every channel that serves its kind
//! - `cycler` - Repeats actions over a wrapping target list
//! - `pool` - Runs cyclers concurrently under a cap
//! - `controller` - Start/stop lifecycle of a run
//! - `console` - Operator list input and statistics output
//! - `config` - TOML configuration with environment overrides
pub mod app;
pub mod channel;
pub mod config;
pub mod console;
pub mod controller;
pub mod counters;
pub mod cycler;
pub mod error;
pub mod executor;
pub mod model;
pub mod pool;
pub mod retry;
pub mod session;
pub mod signal_handler;
pub mod stop;

pub use error::{CadenceError, Result};

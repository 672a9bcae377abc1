//! # TradeAuth Infrastructure
//!
//! Process-level wiring around `tradeauth-common`.
//!
//! This crate contains:
//! - Configuration loading (`.env`, TOML/JSON file, environment overrides)
//! - Redirect URI validation against the registered allowlist
//! - Tracing subscriber initialization
//! - OAuth preflight report and cache reset
//!
//! ## Architecture
//! - Produces the `AuthSettings` that `tradeauth-common`'s `AuthManager` is
//!   constructed with
//! - Contains the code that touches process-global state (environment,
//!   working directory, global subscriber)

#![forbid(unsafe_code)]

pub mod config;
pub mod observability;
pub mod preflight;

// Re-export commonly used items
pub use config::{load, AppConfig, ConfigError};
pub use observability::{init_tracing, LoggingConfig};
pub use preflight::PreflightReport;

//! Configuration loading and management
//!
//! Builds the explicit [`AppConfig`] from `.env`, a TOML/JSON file and the
//! process environment, and checks redirect URIs against the registered
//! allowlist.

pub mod loader;
pub mod validator;

// Re-export commonly used items
pub use loader::{
    load, load_from_file, parse_config, probe_config_paths, resolve, AppConfig, ConfigError,
    FileConfig,
};
pub use validator::{RedirectFinding, RedirectValidator, RegisteredRedirectValidator};

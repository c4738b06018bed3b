//! Sentinel Configuration Module
//!
//! Configuration is loaded once at startup from TOML and passed explicitly
//! to each component's constructor. There is no process-wide config handle.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `HASS_SENTINEL_CONFIG` environment variable (path to TOML file)
//! 3. `sentinel.toml` in the current working directory
//! 4. Built-in defaults (see [`defaults`])

mod sentinel_config;
pub mod defaults;
pub mod validation;

pub use sentinel_config::*;
pub use validation::ValidationWarning;

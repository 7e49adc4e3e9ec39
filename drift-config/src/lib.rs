//! Configuration loading for Drift.
//!
//! Settings come from one source, picked in this order: a file named by
//! `$DRIFT_CONFIG_PATH`, inline JSON in `$DRIFT_CONFIG_JSON`, the first
//! default file found (`drift.toml`, `drift.json`, `config/drift.toml`), or
//! built-in defaults. Per-field environment overrides are applied on top and
//! the result is checked by [`validation::apply_guard_rails`].

#![allow(missing_docs)]

pub mod models;
pub mod overrides;
pub mod validation;

pub use models::{ConfigLoad, DriftConfig, DriftConfigSource};
pub use overrides::EnvOverride;
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings, apply_guard_rails};

//! Configuration loading for the vigil scheduler.
//!
//! Main config file: `vigil.toml`, `vigil.yaml`, or `vigil.json`, searched in
//! `./` then `~/.config/vigil/`. Engine settings live in separate files
//! located by wildcard under `engines.resource_dir`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod locate;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{config_dir, discover_and_load, load_config, load_or_default},
    locate::{find_matching, load_engine_settings, locate_unique, read_engine_settings},
    schema::{ClusterConfig, DaemonConfig, EngineSettings, EnginesConfig, VigilConfig},
};

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{Error, Result, env_subst::substitute_env, schema::VigilConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["vigil.toml", "vigil.yaml", "vigil.yml", "vigil.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<VigilConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./vigil.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/vigil/vigil.{toml,yaml,yml,json}` (user-global)
///
/// Returns `VigilConfig::default()` if no config file is found or it fails
/// to parse.
pub fn discover_and_load() -> VigilConfig {
    match find_config_file(Path::new(".")) {
        Some(path) => load_or_default(&path),
        None => {
            debug!("no config file found, using defaults");
            VigilConfig::default()
        },
    }
}

/// Load `path`, logging and falling back to defaults on failure.
pub fn load_or_default(path: &Path) -> VigilConfig {
    debug!(path = %path.display(), "loading config");
    match load_config(path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            VigilConfig::default()
        },
    }
}

/// Find the first config file in `local_dir`, then in the user config dir.
fn find_config_file(local_dir: &Path) -> Option<PathBuf> {
    let local = CONFIG_FILENAMES
        .iter()
        .map(|name| local_dir.join(name))
        .find(|p| p.exists());
    if local.is_some() {
        return local;
    }

    let config_dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/vigil/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "vigil").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> Result<VigilConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}

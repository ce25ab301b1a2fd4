//! Wildcard lookup of engine settings files.

use std::path::{Path, PathBuf};

use {
    globset::Glob,
    tracing::{debug, warn},
    walkdir::WalkDir,
};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    error::Context,
    schema::EngineSettings,
};

/// Every file under `root` whose path relative to `root` matches `pattern`.
///
/// Results are sorted so callers see a stable order.
pub fn find_matching(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = Glob::new(pattern)?.compile_matcher();
    let mut found: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .is_ok_and(|rel| matcher.is_match(rel))
        })
        .map(|entry| entry.into_path())
        .collect();
    found.sort();
    Ok(found)
}

/// The single file matching `pattern`, or `None` when there are zero or
/// several matches.
pub fn locate_unique(root: &Path, pattern: &str) -> Result<Option<PathBuf>> {
    let mut found = find_matching(root, pattern)?;
    match found.len() {
        1 => Ok(found.pop()),
        0 => {
            debug!(root = %root.display(), pattern, "no resource matches pattern");
            Ok(None)
        },
        n => {
            warn!(
                root = %root.display(),
                pattern,
                matches = n,
                "ambiguous resource pattern, ignoring all matches"
            );
            Ok(None)
        },
    }
}

/// Read and parse an engine settings file.
pub fn read_engine_settings(path: &Path) -> Result<EngineSettings> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    toml::from_str::<EngineSettings>(&substitute_env(&raw))
        .with_context(|| format!("invalid engine settings in {}", path.display()))
}

/// Locate and load engine settings; any failure means "no configuration".
pub fn load_engine_settings(root: &Path, pattern: &str) -> Option<EngineSettings> {
    let path = match locate_unique(root, pattern) {
        Ok(Some(path)) => path,
        Ok(None) => return None,
        Err(e) => {
            warn!(pattern, error = %e, "invalid engine settings pattern");
            return None;
        },
    };

    match read_engine_settings(&path) {
        Ok(settings) => {
            debug!(path = %path.display(), "loaded engine settings");
            Some(settings)
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load engine settings");
            None
        },
    }
}

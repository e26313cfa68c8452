//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Apply `KILN_*` environment fallbacks
//! 3. Merge `~/.kiln/config.toml` (user)
//! 4. Merge `{workspace}/.kiln/config.toml` (workspace)
//! 5. Deserialize merged tree → `Config`
//! 6. Validate

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, deep_merge};
use crate::show::ResolvedConfig;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Directory under home and workspace roots that holds `config.toml`.
pub const CONFIG_DIR: &str = ".kiln";

/// Config file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load the configuration with layered file precedence.
///
/// `workspace_root` is usually the unit root being hosted; if `None` the
/// workspace layer is skipped. `home_override` replaces the `.kiln` directory
/// used for the user layer.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, or if the
/// final merged configuration fails validation.
pub fn load(
    workspace_root: Option<&Path>,
    home_override: Option<&Path>,
) -> ConfigResult<ResolvedConfig> {
    let env_vars = collect_env_vars();
    load_with_env(workspace_root, home_override, &env_vars)
}

pub(crate) fn load_with_env(
    workspace_root: Option<&Path>,
    home_override: Option<&Path>,
    env_vars: &std::collections::HashMap<String, String>,
) -> ConfigResult<ResolvedConfig> {
    // 1. Parse embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut layers = vec![(ConfigLayer::Defaults, "<embedded defaults>".to_owned())];

    // 2. Environment fallbacks sit below every file layer.
    let env_count = apply_env_fallbacks(&mut merged, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
        layers.push((ConfigLayer::Environment, format!("{env_count} KILN_* variable(s)")));
    }

    // 3. User config.
    let user_path = match home_override {
        Some(dir) => dir.join(CONFIG_FILE),
        None => home_directory()?.join(CONFIG_DIR).join(CONFIG_FILE),
    };
    if let Some(overlay) = try_load_file(&user_path)? {
        deep_merge(&mut merged, &overlay);
        info!(path = %user_path.display(), "loaded user config");
        layers.push((ConfigLayer::User, user_path.display().to_string()));
    }

    // 4. Workspace config.
    if let Some(ws_root) = workspace_root {
        let ws_path = ws_root.join(CONFIG_DIR).join(CONFIG_FILE);
        if let Some(overlay) = try_load_file(&ws_path)? {
            deep_merge(&mut merged, &overlay);
            info!(path = %ws_path.display(), "loaded workspace config");
            layers.push((ConfigLayer::Workspace, ws_path.display().to_string()));
        }
    }

    // 5. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 6. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig { config, layers })
}

/// Load a config from a specific file path (no layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let Some(value) = try_load_file(path)? else {
        return Err(ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
    };
    let config: Config = value
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;

    validate::validate(&config)?;
    Ok(config)
}

/// The `~/.kiln` directory.
///
/// # Errors
///
/// Returns [`ConfigError::NoHomeDir`] if no home directory is known.
pub fn kiln_home() -> ConfigResult<PathBuf> {
    Ok(home_directory()?.join(CONFIG_DIR))
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

/// Determine the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use super::*;

    fn write_config(dir: &Path, body: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(CONFIG_FILE), body).unwrap();
    }

    #[test]
    fn test_defaults_deserialize_to_config() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_try_load_file_missing() {
        let result = try_load_file(Path::new("/nonexistent/config.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_load_file_nonexistent() {
        let result = load_file(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_defaults_only() {
        let home = tempfile::tempdir().unwrap();
        let resolved = load_with_env(None, Some(home.path()), &HashMap::new()).unwrap();

        assert_eq!(resolved.config, Config::default());
        assert_eq!(resolved.layers.len(), 1);
    }

    #[test]
    fn test_workspace_overrides_user() {
        let home = tempfile::tempdir().unwrap();
        let ws = tempfile::tempdir().unwrap();
        write_config(home.path(), "[reload]\ndebounce_ms = 800\nauto_reload = true\n");
        write_config(
            &ws.path().join(CONFIG_DIR),
            "[reload]\ndebounce_ms = 200\n",
        );

        let resolved =
            load_with_env(Some(ws.path()), Some(home.path()), &HashMap::new()).unwrap();

        assert_eq!(resolved.config.reload.debounce_ms, 200);
        assert!(resolved.config.reload.auto_reload);
        assert_eq!(resolved.loaded_files().count(), 2);
    }

    #[test]
    fn test_env_fills_only_unset_fields() {
        let home = tempfile::tempdir().unwrap();
        write_config(home.path(), "[watch]\nslack_ms = 50\n");
        let env: HashMap<String, String> = [
            ("KILN_SLACK_MS".to_owned(), "400".to_owned()),
            ("KILN_LOG_LEVEL".to_owned(), "debug".to_owned()),
        ]
        .into_iter()
        .collect();

        let resolved = load_with_env(None, Some(home.path()), &env).unwrap();

        assert_eq!(resolved.config.watch.slack_ms, 50);
        assert_eq!(resolved.config.logging.level, "debug");
        assert_eq!(resolved.layers[1].0, ConfigLayer::Environment);
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let home = tempfile::tempdir().unwrap();
        write_config(home.path(), "[reload\n");

        let err = load_with_env(None, Some(home.path()), &HashMap::new()).unwrap_err();
        match err {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_merged_value_rejected() {
        let home = tempfile::tempdir().unwrap();
        write_config(home.path(), "[history]\nmax_entries = 0\n");

        let err = load_with_env(None, Some(home.path()), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "history.max_entries"));
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let home = tempfile::tempdir().unwrap();
        write_config(home.path(), "[reload]\ndebounce_ms = \"fast\"\n");

        let err = load_with_env(None, Some(home.path()), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { ref path, .. } if path == "<merged config>"));
    }

    #[test]
    fn test_oversized_file_rejected() {
        let home = tempfile::tempdir().unwrap();
        let padding = "#".repeat(1_100_000);
        write_config(home.path(), &padding);

        let err = load_with_env(None, Some(home.path()), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }
}

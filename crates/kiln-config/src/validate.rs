//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Longest accepted debounce window (one minute).
const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_reload(config)?;
    validate_watch(config)?;
    validate_descriptor(config)?;
    validate_logging(config)?;
    validate_history(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_reload(config: &Config) -> ConfigResult<()> {
    let r = &config.reload;
    if r.debounce_ms > MAX_DEBOUNCE_MS {
        return Err(invalid(
            "reload.debounce_ms",
            format!("debounce_ms must be at most {MAX_DEBOUNCE_MS}"),
        ));
    }
    if r.event_capacity == 0 {
        return Err(invalid(
            "reload.event_capacity",
            "event_capacity must be at least 1",
        ));
    }
    Ok(())
}

fn validate_watch(config: &Config) -> ConfigResult<()> {
    let w = &config.watch;
    if w.recheck_delay_ms == 0 {
        return Err(invalid(
            "watch.recheck_delay_ms",
            "recheck_delay_ms must be greater than 0",
        ));
    }
    if w.extensions.is_empty() {
        return Err(invalid("watch.extensions", "at least one extension is required"));
    }
    for ext in &w.extensions {
        if ext.is_empty() || ext.starts_with('.') || ext.contains(['/', '\\']) {
            return Err(invalid(
                "watch.extensions",
                format!("'{ext}' must be a bare extension such as \"wat\""),
            ));
        }
    }
    Ok(())
}

fn validate_descriptor(config: &Config) -> ConfigResult<()> {
    let d = &config.descriptor;
    if d.module_extension.is_empty() || d.module_extension.starts_with('.') {
        return Err(invalid(
            "descriptor.module_extension",
            "module_extension must be a bare extension such as \"wat\"",
        ));
    }
    let valid_ident = !d.default_entry_point.is_empty()
        && d.default_entry_point
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_ident {
        return Err(invalid(
            "descriptor.default_entry_point",
            format!(
                "'{}' is not a valid export name",
                d.default_entry_point
            ),
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.to_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }
    match l.target.as_str() {
        "stderr" | "stdout" => {},
        "file" if l.directory.is_some() => {},
        "file" => {
            return Err(invalid(
                "logging.directory",
                "a directory is required when target is \"file\"",
            ));
        },
        other => {
            return Err(invalid(
                "logging.target",
                format!("unsupported target '{other}'; expected one of: stderr, stdout, file"),
            ));
        },
    }
    Ok(())
}

fn validate_history(config: &Config) -> ConfigResult<()> {
    if config.history.max_entries == 0 {
        return Err(invalid(
            "history.max_entries",
            "max_entries must be at least 1",
        ));
    }
    Ok(())
}

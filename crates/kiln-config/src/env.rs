//! Environment variable fallbacks.
//!
//! `KILN_*` variables sit between the embedded defaults and any config file:
//! they replace a default but never a value a file sets explicitly.

use std::collections::HashMap;

use tracing::warn;

/// Prefix shared by every recognised variable.
pub const ENV_PREFIX: &str = "KILN_";

#[derive(Debug, Clone, Copy)]
enum EnvKind {
    Integer,
    Bool,
    Text,
    List,
}

/// Variable → dotted config field.
const ENV_MAPPINGS: &[(&str, &str, EnvKind)] = &[
    ("KILN_DEBOUNCE_MS", "reload.debounce_ms", EnvKind::Integer),
    ("KILN_AUTO_RELOAD", "reload.auto_reload", EnvKind::Bool),
    ("KILN_SLACK_MS", "watch.slack_ms", EnvKind::Integer),
    ("KILN_RECHECK_DELAY_MS", "watch.recheck_delay_ms", EnvKind::Integer),
    ("KILN_WATCH_EXTENSIONS", "watch.extensions", EnvKind::List),
    (
        "KILN_ENTRY_POINT",
        "descriptor.default_entry_point",
        EnvKind::Text,
    ),
    ("KILN_LOG_LEVEL", "logging.level", EnvKind::Text),
    ("KILN_LOG_FORMAT", "logging.format", EnvKind::Text),
    ("KILN_HISTORY_PATH", "history.path", EnvKind::Text),
];

/// Snapshot every `KILN_*` variable of the current process.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect()
}

/// Write recognised variables from `env` into `merged`.
///
/// Values that do not parse for their field are skipped with a warning.
/// Returns the number of fields set.
pub fn apply_env_fallbacks(merged: &mut toml::Value, env: &HashMap<String, String>) -> usize {
    let mut applied = 0usize;
    for (var, field, kind) in ENV_MAPPINGS {
        let Some(raw) = env.get(*var) else {
            continue;
        };
        let Some(value) = parse_value(raw, *kind) else {
            warn!(var, value = %raw, "ignoring unparseable environment override");
            continue;
        };
        set_path(merged, field, value);
        applied = applied.saturating_add(1);
    }
    applied
}

fn parse_value(raw: &str, kind: EnvKind) -> Option<toml::Value> {
    let raw = raw.trim();
    match kind {
        EnvKind::Integer => raw.parse::<i64>().ok().map(toml::Value::Integer),
        EnvKind::Bool => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Some(toml::Value::Boolean(false)),
            _ => None,
        },
        EnvKind::Text if raw.is_empty() => None,
        EnvKind::Text => Some(toml::Value::String(raw.to_owned())),
        EnvKind::List => {
            let items: Vec<toml::Value> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect();
            (!items.is_empty()).then_some(toml::Value::Array(items))
        },
    }
}

fn set_path(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };
    let mut current = root;
    for segment in segments {
        let toml::Value::Table(table) = current else {
            return;
        };
        current = table
            .entry(segment)
            .or_insert(toml::Value::Table(toml::Table::new()));
    }
    if let toml::Value::Table(table) = current {
        table.insert(leaf.to_owned(), value);
    }
}

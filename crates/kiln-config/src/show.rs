//! Resolved configuration display.

use std::fmt;

use serde::Serialize;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::ConfigLayer;
use crate::types::Config;

/// A loaded configuration together with the layers that contributed to it.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The merged, validated configuration.
    pub config: Config,
    /// Layers applied in order, with the file (or marker) each came from.
    pub layers: Vec<(ConfigLayer, String)>,
}

/// Output format for [`ResolvedConfig::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowFormat {
    /// TOML, the format config files are written in.
    #[default]
    Toml,
    /// Pretty-printed JSON.
    Json,
}

impl ShowFormat {
    /// Parse a format name (`toml` or `json`).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct JsonView<'a> {
    config: &'a Config,
    layers: Vec<JsonLayer<'a>>,
}

#[derive(Serialize)]
struct JsonLayer<'a> {
    layer: String,
    source: &'a str,
}

impl ResolvedConfig {
    /// Files (not defaults or environment) that were merged.
    pub fn loaded_files(&self) -> impl Iterator<Item = &str> {
        self.layers
            .iter()
            .filter(|(layer, _)| matches!(layer, ConfigLayer::User | ConfigLayer::Workspace))
            .map(|(_, source)| source.as_str())
    }

    /// Render the configuration in `format`.
    ///
    /// TOML output is prefixed with a comment per contributing layer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SerializeError`] if serialization fails.
    pub fn render(&self, format: ShowFormat) -> ConfigResult<String> {
        match format {
            ShowFormat::Toml => {
                let body = toml::to_string_pretty(&self.config)
                    .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
                let mut out = String::new();
                for (layer, source) in &self.layers {
                    out.push_str(&format!("# {layer}: {source}\n"));
                }
                out.push('\n');
                out.push_str(&body);
                Ok(out)
            },
            ShowFormat::Json => {
                let view = JsonView {
                    config: &self.config,
                    layers: self
                        .layers
                        .iter()
                        .map(|(layer, source)| JsonLayer {
                            layer: layer.to_string(),
                            source,
                        })
                        .collect(),
                };
                serde_json::to_string_pretty(&view)
                    .map_err(|e| ConfigError::SerializeError(e.to_string()))
            },
        }
    }
}

impl fmt::Display for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render(ShowFormat::Toml) {
            Ok(text) => f.write_str(&text),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> ResolvedConfig {
        ResolvedConfig {
            config: Config::default(),
            layers: vec![
                (ConfigLayer::Defaults, "<embedded defaults>".to_owned()),
                (ConfigLayer::User, "/home/u/.kiln/config.toml".to_owned()),
            ],
        }
    }

    #[test]
    fn test_toml_render_lists_layers() {
        let text = resolved().render(ShowFormat::Toml).unwrap();
        assert!(text.starts_with("# defaults: <embedded defaults>\n"));
        assert!(text.contains("# user: /home/u/.kiln/config.toml"));
        assert!(text.contains("debounce_ms = 1500"));
    }

    #[test]
    fn test_json_render_round_trips_config() {
        let text = resolved().render(ShowFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["config"]["watch"]["slack_ms"], 100);
        assert_eq!(value["layers"][1]["layer"], "user");
    }

    #[test]
    fn test_loaded_files_skip_defaults() {
        let resolved = resolved();
        let files: Vec<&str> = resolved.loaded_files().collect();
        assert_eq!(files, vec!["/home/u/.kiln/config.toml"]);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ShowFormat::parse("JSON"), Some(ShowFormat::Json));
        assert_eq!(ShowFormat::parse("yaml"), None);
    }
}

//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A TOML document could not be parsed or deserialized.
    #[error("failed to parse config at {path}: {source}")]
    ParseError {
        /// File path, or a `<...>` marker for in-memory documents.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A config file exists but could not be read.
    #[error("failed to read config at {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A field holds a value outside its accepted range.
    #[error("invalid config value for {field}: {message}")]
    ValidationError {
        /// Dotted field path, e.g. `watch.slack_ms`.
        field: String,
        /// What is wrong with the value.
        message: String,
    },

    /// The resolved configuration could not be rendered.
    #[error("failed to render config: {0}")]
    SerializeError(String),

    /// The user's home directory could not be determined.
    #[error("could not determine home directory")]
    NoHomeDir,
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

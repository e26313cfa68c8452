//! Bridge from `kiln_config::Config` to host and telemetry types.

use kiln_config::Config;
use kiln_host::{DescriptorConfig, ReloadConfig, WatchConfig};
use kiln_telemetry::{LogConfig, LogFormat, LogTarget};

/// Descriptor resolution settings.
pub(crate) fn to_descriptor_config(cfg: &Config) -> DescriptorConfig {
    DescriptorConfig {
        module_extension: cfg.descriptor.module_extension.clone(),
        default_entry_point: cfg.descriptor.default_entry_point.clone(),
    }
}

/// Watch session settings.
pub(crate) fn to_watch_config(cfg: &Config) -> WatchConfig {
    WatchConfig {
        extensions: cfg.watch.extensions.clone(),
        slack: cfg.watch.slack(),
        recheck_delay: cfg.watch.recheck_delay(),
    }
}

/// Orchestrator settings.
pub(crate) fn to_reload_config(cfg: &Config) -> ReloadConfig {
    ReloadConfig {
        debounce: cfg.reload.debounce(),
        watch: to_watch_config(cfg),
        descriptor: to_descriptor_config(cfg),
        auto_reload: cfg.reload.auto_reload,
        event_capacity: cfg.reload.event_capacity,
    }
}

/// Logging settings. Values were validated on load; unknown formats fall
/// back to compact.
pub(crate) fn to_log_config(cfg: &Config) -> LogConfig {
    let l = &cfg.logging;
    let format = l.format.parse().unwrap_or(LogFormat::Compact);
    let mut log = LogConfig::new(l.level.to_lowercase()).with_format(format);
    log = match (l.target.as_str(), &l.directory) {
        ("file", Some(dir)) => log.with_file_logging(dir.clone()),
        ("stdout", _) => log.with_target(LogTarget::Stdout),
        _ => log.with_target(LogTarget::Stderr),
    };
    for directive in &l.directives {
        log = log.with_directive(directive.clone());
    }
    log
}

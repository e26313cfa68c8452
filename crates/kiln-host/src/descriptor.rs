//! Descriptor discovery and parsing.
//!
//! A unit root holds exactly one `.ini` descriptor naming the code module
//! and the symbol its capability is built from:
//!
//! ```ini
//! [source]
//! module = widget_a
//! entry_point = build
//! description = Demo widget
//! ```
//!
//! `module` is required; `entry_point` falls back to the configured default.
//! The parser accepts the usual INI dialect: `=` or `:` separators, `#` and
//! `;` comment lines, indented continuation lines, case-insensitive keys.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::error::{Diagnostic, HostError, HostResult, Stage};
use crate::unit::{ModuleIdentity, SourceUnit, file_name};

/// Descriptor file extension.
pub const DESCRIPTOR_EXTENSION: &str = "ini";

/// Section holding the unit keys.
pub const SOURCE_SECTION: &str = "source";

/// Entry point used when the descriptor does not name one.
pub const DEFAULT_ENTRY_POINT: &str = "main_widget";

/// Extension of the code module named by the descriptor.
pub const DEFAULT_MODULE_EXTENSION: &str = "wat";

/// How descriptors map onto files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorConfig {
    /// Extension appended to the `module` stem.
    pub module_extension: String,
    /// Entry point used when `entry_point` is absent or empty.
    pub default_entry_point: String,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            module_extension: DEFAULT_MODULE_EXTENSION.to_string(),
            default_entry_point: DEFAULT_ENTRY_POINT.to_string(),
        }
    }
}

/// A malformed line in a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct DescriptorSyntaxError {
    /// 1-based line number.
    pub line: usize,
    /// What is wrong with it.
    pub message: String,
}

/// Parsed descriptor contents: section → key → value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    sections: HashMap<String, HashMap<String, String>>,
}

impl Descriptor {
    /// Parse descriptor text.
    ///
    /// # Errors
    ///
    /// Returns the first malformed line: a key outside any section, a
    /// duplicate section or key, an empty header, or a line without a
    /// separator.
    pub fn parse(text: &str) -> Result<Self, DescriptorSyntaxError> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line = idx.saturating_add(1);
            let trimmed = raw.trim();
            let fail = |message: String| DescriptorSyntaxError { line, message };

            if trimmed.is_empty() {
                last_key = None;
                continue;
            }
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            // Indented line directly after a value continues that value.
            if raw.starts_with(char::is_whitespace)
                && let (Some(section), Some(key)) = (&current, &last_key)
                && let Some(value) = sections.get_mut(section).and_then(|s| s.get_mut(key))
            {
                value.push('\n');
                value.push_str(trimmed);
                continue;
            }

            if let Some(header) = trimmed.strip_prefix('[') {
                let Some(name) = header.strip_suffix(']') else {
                    return Err(fail(format!("unterminated section header: {trimmed}")));
                };
                let name = name.trim();
                if name.is_empty() {
                    return Err(fail("empty section header".into()));
                }
                if sections.contains_key(name) {
                    return Err(fail(format!("duplicate section [{name}]")));
                }
                sections.insert(name.to_string(), HashMap::new());
                current = Some(name.to_string());
                last_key = None;
                continue;
            }

            let Some(split) = trimmed.find(['=', ':']) else {
                return Err(fail(format!("expected `key = value`, got: {trimmed}")));
            };
            let (key, value) = trimmed.split_at(split);
            let key = key.trim().to_lowercase();
            let value = value[1..].trim();
            if key.is_empty() {
                return Err(fail("missing key before separator".into()));
            }
            let Some(section) = &current else {
                return Err(fail(format!("`{key}` appears before any section header")));
            };
            let entries = sections.entry(section.clone()).or_default();
            if entries.contains_key(&key) {
                return Err(fail(format!("duplicate key `{key}` in [{section}]")));
            }
            entries.insert(key.clone(), value.to_string());
            last_key = Some(key);
        }

        Ok(Self { sections })
    }

    /// Whether `section` was declared.
    #[must_use]
    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    /// Value of `key` (case-insensitive) in `section`.
    #[must_use]
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)?
            .get(&key.to_lowercase())
            .map(String::as_str)
    }
}

/// Resolve the source unit rooted at `root`.
///
/// # Errors
///
/// - [`HostError::DescriptorMissing`] if `root` is not a directory or holds no `.ini` file.
/// - [`HostError::DescriptorInvalid`] if the descriptor is ambiguous, malformed,
///   lacks `[source]`, or has an empty or non-stem `module`.
/// - [`HostError::ModuleNotFound`] if the named module file does not exist.
pub fn resolve_unit(root: &Path, config: &DescriptorConfig) -> HostResult<SourceUnit> {
    let root = root.canonicalize().map_err(|e| {
        HostError::DescriptorMissing(Diagnostic::new(
            Stage::Descriptor,
            root.display().to_string(),
            format!("unit root is not accessible: {e}"),
        ))
    })?;
    let descriptor_path = locate_descriptor(&root)?;
    let descriptor_name = file_name(&descriptor_path);
    let invalid = |line: Option<usize>, message: String| {
        HostError::DescriptorInvalid(
            Diagnostic::new(Stage::Descriptor, descriptor_name.clone(), message).with_line(line),
        )
    };

    let text = fs::read_to_string(&descriptor_path)
        .map_err(|e| invalid(None, format!("descriptor is unreadable: {e}")))?;
    let descriptor = Descriptor::parse(&text).map_err(|e| invalid(Some(e.line), e.message))?;

    if !descriptor.has_section(SOURCE_SECTION) {
        return Err(invalid(None, format!("missing [{SOURCE_SECTION}] section")));
    }
    let module = descriptor
        .get(SOURCE_SECTION, "module")
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            invalid(
                None,
                format!("missing required key `module` in [{SOURCE_SECTION}]"),
            )
        })?;
    let identity = ModuleIdentity::new(module).map_err(|msg| invalid(None, msg))?;

    let entry_point = descriptor
        .get(SOURCE_SECTION, "entry_point")
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .unwrap_or(&config.default_entry_point)
        .to_string();
    let description = descriptor
        .get(SOURCE_SECTION, "description")
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_owned);

    let module_path = root.join(format!("{module}.{}", config.module_extension));
    if !module_path.is_file() {
        return Err(HostError::ModuleNotFound(Diagnostic::new(
            Stage::Descriptor,
            file_name(&module_path),
            format!(
                "module `{module}` named by {descriptor_name} not found in {}",
                root.display()
            ),
        )));
    }

    debug!(
        root = %root.display(),
        module = %identity,
        entry_point = %entry_point,
        "Resolved source unit"
    );

    Ok(SourceUnit::new(
        root,
        descriptor_path,
        module_path,
        identity,
        entry_point,
        description,
    ))
}

/// Find the single `.ini` file directly under `root`.
fn locate_descriptor(root: &Path) -> HostResult<PathBuf> {
    let missing = |message: String| {
        HostError::DescriptorMissing(Diagnostic::new(
            Stage::Descriptor,
            root.display().to_string(),
            message,
        ))
    };
    let entries = fs::read_dir(root).map_err(|e| missing(format!("cannot list unit root: {e}")))?;

    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(DESCRIPTOR_EXTENSION))
        })
        .collect();
    found.sort();

    match found.len() {
        0 => Err(missing(format!(
            "no .{DESCRIPTOR_EXTENSION} descriptor found in unit root"
        ))),
        1 => Ok(found.remove(0)),
        _ => {
            let names: Vec<String> = found.iter().map(|p| file_name(p)).collect();
            Err(HostError::DescriptorInvalid(Diagnostic::new(
                Stage::Descriptor,
                root.display().to_string(),
                format!("ambiguous descriptor: found {}", names.join(", ")),
            )))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit_dir(descriptor: &str, modules: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("unit.ini"), descriptor).unwrap();
        for module in modules {
            fs::write(dir.path().join(module), "(module)").unwrap();
        }
        dir
    }

    #[test]
    fn test_parse_separators_comments_and_case() {
        let text = "# leading comment\n[source]\nModule = widget_a\n; note\nentry_point: build\n";
        let d = Descriptor::parse(text).unwrap();
        assert_eq!(d.get("source", "module"), Some("widget_a"));
        assert_eq!(d.get("source", "ENTRY_POINT"), Some("build"));
    }

    #[test]
    fn test_parse_continuation_lines() {
        let text = "[source]\ndescription = first\n  second\nmodule = m\n";
        let d = Descriptor::parse(text).unwrap();
        assert_eq!(d.get("source", "description"), Some("first\nsecond"));
        assert_eq!(d.get("source", "module"), Some("m"));
    }

    #[test]
    fn test_parse_rejects_key_before_section() {
        let err = Descriptor::parse("module = x\n[source]\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_parse_rejects_duplicates() {
        let err = Descriptor::parse("[source]\nmodule = a\nmodule = b\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("duplicate key"));

        let err = Descriptor::parse("[source]\n[source]\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_parse_rejects_line_without_separator() {
        let err = Descriptor::parse("[source]\njust words\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_resolve_defaults_entry_point() {
        let dir = unit_dir("[source]\nmodule = widget_a\n", &["widget_a.wat"]);
        let unit = resolve_unit(dir.path(), &DescriptorConfig::default()).unwrap();
        assert_eq!(unit.identity().as_str(), "widget_a");
        assert_eq!(unit.entry_point(), DEFAULT_ENTRY_POINT);
        assert_eq!(unit.module_file_name(), "widget_a.wat");
        assert!(unit.description().is_none());
    }

    #[test]
    fn test_resolve_reads_entry_point_and_description() {
        let dir = unit_dir(
            "[source]\nmodule = widget_a\nentry_point = build\ndescription = Demo\n",
            &["widget_a.wat"],
        );
        let unit = resolve_unit(dir.path(), &DescriptorConfig::default()).unwrap();
        assert_eq!(unit.entry_point(), "build");
        assert_eq!(unit.description(), Some("Demo"));
    }

    #[test]
    fn test_resolve_missing_descriptor() {
        let dir = TempDir::new().unwrap();
        let err = resolve_unit(dir.path(), &DescriptorConfig::default()).unwrap_err();
        assert!(matches!(err, HostError::DescriptorMissing(_)), "{err}");
    }

    #[test]
    fn test_resolve_missing_root() {
        let err = resolve_unit(Path::new("/definitely/not/here"), &DescriptorConfig::default())
            .unwrap_err();
        assert!(matches!(err, HostError::DescriptorMissing(_)));
    }

    #[test]
    fn test_resolve_ambiguous_descriptor() {
        let dir = unit_dir("[source]\nmodule = a\n", &["a.wat"]);
        fs::write(dir.path().join("other.ini"), "[source]\nmodule = a\n").unwrap();
        let err = resolve_unit(dir.path(), &DescriptorConfig::default()).unwrap_err();
        assert!(matches!(err, HostError::DescriptorInvalid(_)));
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_resolve_missing_section() {
        let dir = unit_dir("[other]\nmodule = a\n", &["a.wat"]);
        let err = resolve_unit(dir.path(), &DescriptorConfig::default()).unwrap_err();
        assert!(matches!(err, HostError::DescriptorInvalid(_)));
    }

    #[test]
    fn test_resolve_empty_module_is_invalid() {
        let dir = unit_dir("[source]\nmodule =   \n", &[]);
        let err = resolve_unit(dir.path(), &DescriptorConfig::default()).unwrap_err();
        assert!(matches!(err, HostError::DescriptorInvalid(_)));
        assert!(err.to_string().contains("module"));
    }

    #[test]
    fn test_resolve_rejects_path_like_module() {
        let dir = unit_dir("[source]\nmodule = ../escape\n", &[]);
        let err = resolve_unit(dir.path(), &DescriptorConfig::default()).unwrap_err();
        assert!(matches!(err, HostError::DescriptorInvalid(_)));
    }

    #[test]
    fn test_resolve_module_not_found() {
        let dir = unit_dir("[source]\nmodule = absent\n", &["present.wat"]);
        let err = resolve_unit(dir.path(), &DescriptorConfig::default()).unwrap_err();
        assert!(matches!(err, HostError::ModuleNotFound(_)));
        assert!(err.to_string().starts_with("[DESCRIPTOR] absent.wat"));
    }

    #[test]
    fn test_malformed_descriptor_reports_line() {
        let dir = unit_dir("[source]\nmodule = a\nbroken line\n", &["a.wat"]);
        let err = resolve_unit(dir.path(), &DescriptorConfig::default()).unwrap_err();
        assert_eq!(err.diagnostics()[0].line, Some(3));
    }
}

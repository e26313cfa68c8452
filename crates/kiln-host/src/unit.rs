//! The source unit: a descriptor plus the code module it names.

use std::fmt;
use std::path::{Path, PathBuf};

/// Identity a loaded module is registered under.
///
/// Derived from the descriptor's `module` value, which must be a bare
/// file stem (no separators, no leading dot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdentity(String);

impl ModuleIdentity {
    /// Validate and wrap a module stem.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if `stem` is not a bare,
    /// non-empty file stem.
    pub fn new(stem: impl Into<String>) -> Result<Self, String> {
        let stem = stem.into();
        Self::validate(&stem)?;
        Ok(Self(stem))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(stem: &str) -> Result<(), String> {
        if stem.is_empty() {
            return Err("module name must not be empty".into());
        }
        if stem.starts_with('.') {
            return Err(format!("module name must not start with '.', got: {stem}"));
        }
        if !stem
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(format!(
                "module name must be a bare file stem (letters, digits, '_', '-', '.'), got: {stem}"
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A resolved source unit. Immutable once built; re-resolution yields a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    root: PathBuf,
    descriptor_path: PathBuf,
    module_path: PathBuf,
    identity: ModuleIdentity,
    entry_point: String,
    description: Option<String>,
}

impl SourceUnit {
    pub(crate) fn new(
        root: PathBuf,
        descriptor_path: PathBuf,
        module_path: PathBuf,
        identity: ModuleIdentity,
        entry_point: String,
        description: Option<String>,
    ) -> Self {
        Self {
            root,
            descriptor_path,
            module_path,
            identity,
            entry_point,
            description,
        }
    }

    /// Canonical unit root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the `.ini` descriptor.
    #[must_use]
    pub fn descriptor_path(&self) -> &Path {
        &self.descriptor_path
    }

    /// Path of the code module.
    #[must_use]
    pub fn module_path(&self) -> &Path {
        &self.module_path
    }

    /// File name of the code module, for diagnostics.
    #[must_use]
    pub fn module_file_name(&self) -> String {
        file_name(&self.module_path)
    }

    #[must_use]
    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    /// Symbol the capability is built from.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Last path component as a display string, falling back to the whole path.
pub(crate) fn file_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |n| n.to_string_lossy().into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_accepts_bare_stems() {
        for stem in ["widget_a", "clock-face", "v2.widget", "Widget9"] {
            assert!(ModuleIdentity::new(stem).is_ok(), "{stem} should be accepted");
        }
    }

    #[test]
    fn test_identity_rejects_paths_and_hidden_names() {
        for stem in ["", ".hidden", "../escape", "dir/widget", "a\\b", "with space"] {
            assert!(ModuleIdentity::new(stem).is_err(), "{stem:?} should be rejected");
        }
    }

    #[test]
    fn test_file_name_falls_back_to_display() {
        assert_eq!(file_name(Path::new("/a/b/widget.wat")), "widget.wat");
        assert_eq!(file_name(Path::new("/")), "/");
    }
}

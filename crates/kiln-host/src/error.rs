//! Error types for kiln-host.
//!
//! Every failure surfaced to a shell renders as a single-line diagnostic of
//! the form `[<STAGE>] <file>:<line>[:<col>] → <message>`, optionally
//! followed by the offending source line.

use std::fmt;

use thiserror::Error;

/// Where in the validate/load/host sequence a diagnostic originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Descriptor discovery and parsing.
    Descriptor,
    /// Module text parsing.
    Syntax,
    /// Name resolution, type validation and lints.
    Static,
    /// Sibling module discovery.
    Dependency,
    /// Compilation, linking and start-up of the module.
    Load,
    /// Entry point lookup.
    Entry,
    /// Building a capability from the entry point.
    Instantiation,
    /// Faults raised by a hosted capability.
    Runtime,
}

impl Stage {
    /// Tag used inside the bracketed diagnostic prefix.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Descriptor => "DESCRIPTOR",
            Self::Syntax => "SYNTAX",
            Self::Static => "STATIC",
            Self::Dependency => "DEPENDENCY",
            Self::Load => "LOAD",
            Self::Entry => "ENTRY",
            Self::Instantiation => "INSTANTIATION",
            Self::Runtime => "RUNTIME",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A located, stage-tagged problem report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Originating stage.
    pub stage: Stage,
    /// File name (not the full path) the problem was found in.
    pub file: String,
    /// 1-based line, when known.
    pub line: Option<usize>,
    /// 1-based column, when known.
    pub column: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// The offending source line, trimmed.
    pub source_line: Option<String>,
}

impl Diagnostic {
    /// Create an unlocated diagnostic.
    pub fn new(stage: Stage, file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            file: file.into(),
            line: None,
            column: None,
            message: message.into(),
            source_line: None,
        }
    }

    /// Attach a 1-based line.
    #[must_use]
    pub fn with_line(mut self, line: Option<usize>) -> Self {
        self.line = line;
        self
    }

    /// Attach a 1-based line and column.
    #[must_use]
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Attach the text of the offending line.
    #[must_use]
    pub fn with_source_line(mut self, text: Option<&str>) -> Self {
        self.source_line = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        write!(f, " → {}", self.message)?;
        if let Some(text) = &self.source_line {
            write!(f, "\n→ {text}")?;
        }
        Ok(())
    }
}

fn render_all(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors that can occur while resolving, validating or hosting a source unit.
#[derive(Debug, Error)]
pub enum HostError {
    /// No descriptor in the unit root.
    #[error("{0}")]
    DescriptorMissing(Diagnostic),

    /// Descriptor present but unusable.
    #[error("{0}")]
    DescriptorInvalid(Diagnostic),

    /// The module named by the descriptor does not exist.
    #[error("{0}")]
    ModuleNotFound(Diagnostic),

    /// Module text failed to parse.
    #[error("{0}")]
    Syntax(Diagnostic),

    /// One or more static analysis failures.
    #[error("{}", render_all(.0))]
    StaticAnalysis(Vec<Diagnostic>),

    /// Compilation, linking or start-up failed.
    #[error("{0}")]
    ModuleLoad(Diagnostic),

    /// The loaded module does not export the configured entry point.
    #[error("{0}")]
    EntryPointMissing(Diagnostic),

    /// The entry point failed or produced something that is not a capability.
    #[error("{0}")]
    Instantiation(Diagnostic),

    /// A hosted capability faulted while painting or handling input.
    #[error("{0}")]
    RuntimeFault(Diagnostic),

    /// File watching could not be established.
    #[error("watch error: {0}")]
    Watch(String),

    /// The reload orchestrator has shut down.
    #[error("reload orchestrator is not running")]
    OrchestratorClosed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Stage the error is attributed to, if it carries a diagnostic.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        self.diagnostics().first().map(|d| d.stage)
    }

    /// Structured diagnostics carried by this error.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::DescriptorMissing(d)
            | Self::DescriptorInvalid(d)
            | Self::ModuleNotFound(d)
            | Self::Syntax(d)
            | Self::ModuleLoad(d)
            | Self::EntryPointMissing(d)
            | Self::Instantiation(d)
            | Self::RuntimeFault(d) => std::slice::from_ref(d),
            Self::StaticAnalysis(all) => all,
            Self::Watch(_) | Self::OrchestratorClosed | Self::Io(_) => &[],
        }
    }
}

/// Result type alias for kiln-host operations.
pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_format_with_position() {
        let diag = Diagnostic::new(Stage::Syntax, "widget_a.wat", "unexpected token")
            .at(3, 7)
            .with_source_line(Some("    i32.konst 1  "));
        assert_eq!(
            diag.to_string(),
            "[SYNTAX] widget_a.wat:3:7 → unexpected token\n→ i32.konst 1"
        );
    }

    #[test]
    fn test_diagnostic_format_line_only() {
        let diag = Diagnostic::new(Stage::Load, "widget_a.wat", "wasm trap").with_line(Some(12));
        assert_eq!(diag.to_string(), "[LOAD] widget_a.wat:12 → wasm trap");
    }

    #[test]
    fn test_diagnostic_format_unlocated() {
        let diag = Diagnostic::new(Stage::Descriptor, "/tmp/unit", "no descriptor");
        assert_eq!(diag.to_string(), "[DESCRIPTOR] /tmp/unit → no descriptor");
    }

    #[test]
    fn test_static_analysis_renders_every_finding() {
        let err = HostError::StaticAnalysis(vec![
            Diagnostic::new(Stage::Static, "a.wat", "first").with_line(Some(1)),
            Diagnostic::new(Stage::Static, "a.wat", "second").with_line(Some(9)),
        ]);
        assert_eq!(
            err.to_string(),
            "[STATIC] a.wat:1 → first\n[STATIC] a.wat:9 → second"
        );
        assert_eq!(err.stage(), Some(Stage::Static));
        assert_eq!(err.diagnostics().len(), 2);
    }
}

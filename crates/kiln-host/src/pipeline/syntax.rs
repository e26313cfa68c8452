//! Syntax stage: parse module text without executing anything.

use std::fs;
use std::path::Path;

use wast::Wat;
use wast::core::{FuncKind, ModuleField, ModuleKind};
use wast::parser::{self, ParseBuffer};

use crate::error::{Diagnostic, HostError, HostResult, Stage};
use crate::unit::file_name;

/// Module text that parsed cleanly.
#[derive(Debug, Clone)]
pub struct ParsedSource {
    /// Module file name, for diagnostics.
    pub file_name: String,
    /// Full module text.
    pub text: String,
    /// 1-based line of every function defined (not imported) in the module,
    /// in definition order.
    pub function_lines: Vec<usize>,
}

impl ParsedSource {
    /// Line of the `idx`-th defined function.
    #[must_use]
    pub fn line_of_defined(&self, idx: usize) -> Option<usize> {
        self.function_lines.get(idx).copied()
    }

    /// Text of a 1-based line.
    #[must_use]
    pub fn line_text(&self, line: usize) -> Option<&str> {
        self.text.lines().nth(line.checked_sub(1)?)
    }

    /// Diagnostic positioned at `span` within the module text.
    pub(crate) fn diagnostic_at(
        &self,
        stage: Stage,
        span: wast::token::Span,
        message: impl Into<String>,
    ) -> Diagnostic {
        let (line, col) = span.linecol_in(&self.text);
        let line = line.saturating_add(1);
        Diagnostic::new(stage, self.file_name.clone(), message)
            .at(line, col.saturating_add(1))
            .with_source_line(self.line_text(line))
    }
}

/// Parse the module at `path`.
///
/// # Errors
///
/// Returns [`HostError::Syntax`] with the 1-based line and column of the first
/// parse error, or if the file cannot be read.
pub fn check_syntax(path: &Path) -> HostResult<ParsedSource> {
    let name = file_name(path);
    let text = fs::read_to_string(path).map_err(|e| {
        HostError::Syntax(Diagnostic::new(
            Stage::Syntax,
            name.clone(),
            format!("module is unreadable: {e}"),
        ))
    })?;

    let mut source = ParsedSource {
        file_name: name,
        text,
        function_lines: Vec::new(),
    };
    let lines = {
        let fail = |e: wast::Error| {
            HostError::Syntax(source.diagnostic_at(Stage::Syntax, e.span(), e.message()))
        };
        let buf = ParseBuffer::new(&source.text).map_err(fail)?;
        let wat = parser::parse::<Wat>(&buf).map_err(fail)?;
        defined_function_lines(&wat, &source.text)
    };
    source.function_lines = lines;
    Ok(source)
}

fn defined_function_lines(wat: &Wat<'_>, text: &str) -> Vec<usize> {
    let Wat::Module(module) = wat else {
        return Vec::new();
    };
    let ModuleKind::Text(fields) = &module.kind else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|field| match field {
            ModuleField::Func(func) if matches!(func.kind, FuncKind::Inline { .. }) => {
                Some(func.span.linecol_in(text).0.saturating_add(1))
            },
            _ => None,
        })
        .collect()
}

//! Static analysis and dependency discovery.
//!
//! Static analysis encodes the parsed text (resolving every `$name`), runs
//! the full wasm validator, then lints the binary. Lints are split into
//! suppressed categories, which are logged and ignored, and failures.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;
use wasmparser::{
    BinaryReaderError, ElementItems, ExternalKind, FunctionBody, Operator, Parser, Payload,
    TypeRef, Validator,
};
use wast::Wat;
use wast::parser::{self, ParseBuffer};

use super::syntax::ParsedSource;
use crate::error::{Diagnostic, HostError, HostResult, Stage};
use crate::unit::SourceUnit;

/// An import declared by the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub module: String,
    pub name: String,
}

/// Result of a clean static analysis pass.
#[derive(Debug, Clone)]
pub struct AnalyzedModule {
    /// Encoded binary, ready to compile.
    pub bytes: Vec<u8>,
    /// Number of imported functions (they occupy the low function indices).
    pub imported_functions: usize,
    pub imports: Vec<ImportRef>,
    /// Exported names.
    pub exports: Vec<String>,
}

/// Lint categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LintKind {
    /// An imported function nothing calls or exports.
    UnusedImport,
    /// A local that is written but never read.
    UnreadLocal,
}

impl LintKind {
    /// Suppressed lints are logged, never fatal.
    #[must_use]
    pub fn is_suppressed(self) -> bool {
        matches!(self, Self::UnusedImport)
    }
}

/// A single lint hit.
#[derive(Debug, Clone)]
pub struct Finding {
    pub kind: LintKind,
    pub diagnostic: Diagnostic,
}

/// Run static analysis over a parsed module.
///
/// # Errors
///
/// Returns [`HostError::StaticAnalysis`] listing every unresolved name,
/// validation error or non-suppressed lint.
pub fn analyze(parsed: &ParsedSource) -> HostResult<AnalyzedModule> {
    let bytes = encode(parsed)?;

    if let Err(e) = Validator::new().validate_all(&bytes) {
        return Err(HostError::StaticAnalysis(vec![validation_diagnostic(
            parsed, &bytes, &e,
        )]));
    }

    let (module, findings) = lint(parsed, bytes).map_err(|e| {
        HostError::StaticAnalysis(vec![Diagnostic::new(
            Stage::Static,
            parsed.file_name.clone(),
            e.message().to_string(),
        )])
    })?;

    let (suppressed, failures): (Vec<Finding>, Vec<Finding>) =
        findings.into_iter().partition(|f| f.kind.is_suppressed());
    for finding in &suppressed {
        debug!(
            file = %parsed.file_name,
            lint = ?finding.kind,
            message = %finding.diagnostic.message,
            "Suppressed lint"
        );
    }
    if !failures.is_empty() {
        return Err(HostError::StaticAnalysis(
            failures.into_iter().map(|f| f.diagnostic).collect(),
        ));
    }
    Ok(module)
}

/// Re-parse and encode; name resolution errors surface here.
fn encode(parsed: &ParsedSource) -> HostResult<Vec<u8>> {
    let fail = |e: wast::Error| {
        HostError::StaticAnalysis(vec![parsed.diagnostic_at(
            Stage::Static,
            e.span(),
            e.message(),
        )])
    };
    let buf = ParseBuffer::new(&parsed.text).map_err(fail)?;
    let mut wat = parser::parse::<Wat>(&buf).map_err(fail)?;
    let Wat::Module(_) = &wat else {
        return Err(HostError::StaticAnalysis(vec![Diagnostic::new(
            Stage::Static,
            parsed.file_name.clone(),
            "expected a core module, found a component",
        )]));
    };
    wat.encode().map_err(fail)
}

fn validation_diagnostic(
    parsed: &ParsedSource,
    bytes: &[u8],
    err: &BinaryReaderError,
) -> Diagnostic {
    let line = function_containing(bytes, err.offset()).and_then(|idx| parsed.line_of_defined(idx));
    let diag = Diagnostic::new(
        Stage::Static,
        parsed.file_name.clone(),
        format!("{} (at offset {:#x})", err.message(), err.offset()),
    )
    .with_line(line);
    match line {
        Some(l) => diag.with_source_line(parsed.line_text(l)),
        None => diag,
    }
}

/// Index (among defined functions) of the body containing `offset`.
fn function_containing(bytes: &[u8], offset: usize) -> Option<usize> {
    let mut defined = 0usize;
    for payload in Parser::new(0).parse_all(bytes) {
        if let Payload::CodeSectionEntry(body) = payload.ok()? {
            if body.range().contains(&offset) {
                return Some(defined);
            }
            defined = defined.saturating_add(1);
        }
    }
    None
}

fn lint(
    parsed: &ParsedSource,
    bytes: Vec<u8>,
) -> Result<(AnalyzedModule, Vec<Finding>), BinaryReaderError> {
    let mut imports = Vec::new();
    let mut func_imports: Vec<(String, String)> = Vec::new();
    let mut exports = Vec::new();
    let mut referenced: HashSet<u32> = HashSet::new();
    let mut findings = Vec::new();
    let mut defined = 0usize;

    for payload in Parser::new(0).parse_all(&bytes) {
        match payload? {
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import?;
                    if matches!(import.ty, TypeRef::Func(_)) {
                        func_imports.push((import.module.to_string(), import.name.to_string()));
                    }
                    imports.push(ImportRef {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                    });
                }
            },
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export?;
                    if matches!(export.kind, ExternalKind::Func) {
                        referenced.insert(export.index);
                    }
                    exports.push(export.name.to_string());
                }
            },
            Payload::StartSection { func, .. } => {
                referenced.insert(func);
            },
            Payload::ElementSection(reader) => {
                for element in reader {
                    if let ElementItems::Functions(funcs) = element?.items {
                        for func in funcs {
                            referenced.insert(func?);
                        }
                    }
                }
            },
            Payload::CodeSectionEntry(body) => {
                let absolute = func_imports.len().saturating_add(defined);
                let line = parsed.line_of_defined(defined);
                for local in unread_locals(&body, &mut referenced)? {
                    let diag = Diagnostic::new(
                        Stage::Static,
                        parsed.file_name.clone(),
                        format!("local {local} of func {absolute} is assigned but never read"),
                    )
                    .with_line(line);
                    findings.push(Finding {
                        kind: LintKind::UnreadLocal,
                        diagnostic: match line {
                            Some(l) => diag.with_source_line(parsed.line_text(l)),
                            None => diag,
                        },
                    });
                }
                defined = defined.saturating_add(1);
            },
            _ => {},
        }
    }

    for (idx, (module, name)) in func_imports.iter().enumerate() {
        let used = u32::try_from(idx).is_ok_and(|i| referenced.contains(&i));
        if !used {
            findings.push(Finding {
                kind: LintKind::UnusedImport,
                diagnostic: Diagnostic::new(
                    Stage::Static,
                    parsed.file_name.clone(),
                    format!("import `{module}.{name}` is never used"),
                ),
            });
        }
    }

    let module = AnalyzedModule {
        bytes,
        imported_functions: func_imports.len(),
        imports,
        exports,
    };
    Ok((module, findings))
}

/// Locals written in `body` but never read. Records called functions in `referenced`.
fn unread_locals(
    body: &FunctionBody<'_>,
    referenced: &mut HashSet<u32>,
) -> Result<Vec<u32>, BinaryReaderError> {
    let mut read = HashSet::new();
    let mut written = BTreeSet::new();
    let mut ops = body.get_operators_reader()?;
    while !ops.eof() {
        match ops.read()? {
            Operator::Call { function_index }
            | Operator::ReturnCall { function_index }
            | Operator::RefFunc { function_index } => {
                referenced.insert(function_index);
            },
            Operator::LocalGet { local_index } => {
                read.insert(local_index);
            },
            Operator::LocalSet { local_index } | Operator::LocalTee { local_index } => {
                written.insert(local_index);
            },
            _ => {},
        }
    }
    Ok(written
        .into_iter()
        .filter(|local| !read.contains(local))
        .collect())
}

/// Sibling modules the unit imports from.
///
/// An import namespace counts as a dependency when its first segment (split
/// on `.`, `/` or `:`) names a `<segment>.<ext>` file in the unit root.
#[must_use]
pub fn discover_dependencies(
    unit: &SourceUnit,
    imports: &[ImportRef],
    module_extension: &str,
) -> Vec<String> {
    let namespaces: BTreeSet<&str> = imports
        .iter()
        .filter_map(|i| i.module.split(['.', '/', ':']).next())
        .filter(|ns| !ns.is_empty())
        .collect();
    namespaces
        .into_iter()
        .filter(|ns| *ns != unit.identity().as_str())
        .filter(|ns| {
            unit.root()
                .join(format!("{ns}.{module_extension}"))
                .is_file()
        })
        .map(str::to_owned)
        .collect()
}

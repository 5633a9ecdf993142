// src/diagnostics.rs

//! Compiler diagnostics.
//!
//! Diagnostics are collected into a single ordered list and returned next to
//! the lowered output, so every problem in a workflow surfaces in one pass.
//!
//! Codes ([`DiagnosticCode`]) are stable and never renumbered. Lowering
//! stages report through a [`DiagnosticSink`]; [`render`] formats a
//! diagnostic with `line:col` when the source text is known.

use std::fmt;
use std::ops::Range;

use tracing::{error, warn};

/// Stable diagnostic codes owned by the cycle lowering core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    /// Neither a hard cap nor a termination predicate (error), or a
    /// predicate without a hard cap (warning).
    CycleNoTermination,
    /// Iteration construct with no body jobs.
    CycleEmptyBody,
    /// Iteration construct nested inside another construct's body.
    CycleNested,
    /// No concurrency key given; a default was derived.
    CycleNoKey,
    /// A dependency cycle that is not contained in a single construct.
    CycleUndeclared,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::CycleNoTermination => "CYCLE_NO_TERMINATION",
            DiagnosticCode::CycleEmptyBody => "CYCLE_EMPTY_BODY",
            DiagnosticCode::CycleNested => "CYCLE_NESTED",
            DiagnosticCode::CycleNoKey => "CYCLE_NO_KEY",
            DiagnosticCode::CycleUndeclared => "CYCLE_UNDECLARED",
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// Byte range into the workflow source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// 1-based line and column of `start` within `source`.
    ///
    /// Offsets past the end of `source` are clamped to the last character.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let mut offset = self.start.min(source.len());
        while !source.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let col = match before.rfind('\n') {
            Some(nl) => before[nl + 1..].chars().count() + 1,
            None => before.chars().count() + 1,
        };
        (line, col)
    }
}

impl From<Range<usize>> for SourceSpan {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

/// A single compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    pub span: Option<SourceSpan>,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, message)
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warning, message)
    }

    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            span: None,
            hint: None,
        }
    }

    pub fn with_span(mut self, span: Option<SourceSpan>) -> Self {
        self.span = span;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity.as_str(), self.code, self.message)
    }
}

/// Receiver for diagnostics produced by the lowering stages.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// Sink that logs every diagnostic through `tracing` before forwarding it.
///
/// Warnings are logged every time the condition holds, never deduplicated.
#[derive(Debug, Default)]
pub struct TracingSink {
    collected: Vec<Diagnostic>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<Diagnostic> {
        self.collected
    }
}

impl DiagnosticSink for TracingSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        let code = diagnostic.code.as_str();
        match diagnostic.severity {
            Severity::Error => error!(code, detail = %diagnostic.message, "diagnostic"),
            Severity::Warning => warn!(code, detail = %diagnostic.message, "diagnostic"),
        }
        self.collected.push(diagnostic);
    }
}

/// Format a diagnostic for terminal output.
///
/// ```text
/// error[CYCLE_EMPTY_BODY]: loop 'refine' has an empty body
///   --> Loopdag.toml:12:1
///   = hint: add at least one [[loop.refine.body]] entry
/// ```
pub fn render(diagnostic: &Diagnostic, file_name: &str, source: Option<&str>) -> String {
    let mut out = diagnostic.to_string();
    if let (Some(span), Some(src)) = (diagnostic.span, source) {
        let (line, col) = span.line_col(src);
        out.push_str(&format!("\n  --> {file_name}:{line}:{col}"));
    }
    if let Some(hint) = &diagnostic.hint {
        out.push_str(&format!("\n  = hint: {hint}"));
    }
    out
}

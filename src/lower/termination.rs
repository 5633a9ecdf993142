// src/lower/termination.rs

//! Termination checks run on every construct before lowering.

use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::lower::ast::IterationConstruct;

/// Check a construct for missing termination guarantees and structural
/// mistakes.
///
/// Never mutates the construct. Errors for an empty body or a nested
/// construct mean the construct will not be lowered; a missing termination
/// guarantee is an error too, but lowering still proceeds so that later
/// stages can surface their own diagnostics.
pub fn validate(construct: &IterationConstruct) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let name = &construct.name;

    match (construct.max_iters, construct.until.as_ref()) {
        (None, None) => out.push(
            Diagnostic::error(
                DiagnosticCode::CycleNoTermination,
                format!("loop '{name}' has neither max_iters nor an until predicate and may never terminate"),
            )
            .with_span(construct.span)
            .with_hint("set max_iters, until, or both"),
        ),
        (None, Some(_)) => out.push(
            Diagnostic::warning(
                DiagnosticCode::CycleNoTermination,
                format!("loop '{name}' relies on its until predicate alone to terminate"),
            )
            .with_span(construct.span)
            .with_hint("add max_iters as a hard upper bound"),
        ),
        (Some(_), _) => {}
    }

    if construct.body.is_empty() {
        out.push(
            Diagnostic::error(
                DiagnosticCode::CycleEmptyBody,
                format!("loop '{name}' has an empty body"),
            )
            .with_span(construct.span)
            .with_hint(format!("add at least one [[loop.{name}.body]] entry")),
        );
    }

    for inner in construct.nested_members() {
        out.push(
            Diagnostic::error(
                DiagnosticCode::CycleNested,
                format!(
                    "loop '{}' is nested inside loop '{name}'; nested loops are not supported",
                    inner.name
                ),
            )
            .with_span(inner.span.or(construct.span))
            .with_hint("split the inner loop into its own top-level [loop.<name>] section"),
        );
    }

    out
}

/// Whether any of `diagnostics` prevents the construct from being lowered.
///
/// A missing termination guarantee does not: the construct is lowered and
/// flagged unbounded instead.
pub fn blocks_lowering(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| {
        d.is_error()
            && matches!(
                d.code,
                DiagnosticCode::CycleEmptyBody
                    | DiagnosticCode::CycleNested
                    | DiagnosticCode::CycleUndeclared
            )
    })
}

/// Whether the construct has no termination guarantee at all.
pub fn is_unbounded(construct: &IterationConstruct) -> bool {
    construct.max_iters.is_none() && construct.until.is_none()
}

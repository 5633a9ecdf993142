// src/lower/concurrency.rs

//! Concurrency key binding for iteration constructs.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSink};
use crate::lower::ast::IterationConstruct;
use crate::types::QueuePolicy;

static RUNTIME_EXPR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{.*?\}\}").expect("runtime expression pattern is a valid regex")
});

/// Mutual-exclusion configuration attached to a lowered loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcurrencyConfig {
    pub group: String,
    pub queue_policy: QueuePolicy,
}

impl ConcurrencyConfig {
    /// Whether the group is only known at scheduler runtime.
    pub fn is_dynamic(&self) -> bool {
        contains_runtime_expression(&self.group)
    }
}

pub fn contains_runtime_expression(text: &str) -> bool {
    RUNTIME_EXPR_RE.is_match(text)
}

/// Default key for a construct without an explicit one.
pub fn default_key(workflow: &str, construct: &str) -> String {
    format!("{workflow}-{construct}")
}

/// Derive the concurrency key for `construct`.
///
/// An explicit key is used verbatim. Otherwise `<workflow>-<construct>` is
/// used and a `CYCLE_NO_KEY` warning is reported. The policy is always
/// serialize, never cancel.
pub fn bind(
    workflow: &str,
    construct: &IterationConstruct,
    sink: &mut dyn DiagnosticSink,
) -> ConcurrencyConfig {
    let group = match &construct.concurrency {
        Some(key) => {
            if contains_runtime_expression(key) {
                debug!(
                    loop_name = %construct.name,
                    key = %key,
                    "concurrency key contains runtime expressions; passing through verbatim"
                );
            }
            key.clone()
        }
        None => {
            let key = default_key(workflow, &construct.name);
            sink.report(
                Diagnostic::warning(
                    DiagnosticCode::CycleNoKey,
                    format!(
                        "loop '{}' has no concurrency key; using '{key}'",
                        construct.name
                    ),
                )
                .with_span(construct.span)
                .with_hint("set `concurrency` to scope the loop, e.g. per branch"),
            );
            key
        }
    };

    ConcurrencyConfig {
        group,
        queue_policy: QueuePolicy::SerializeNoCancel,
    }
}

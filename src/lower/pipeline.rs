// src/lower/pipeline.rs

//! Whole-workflow lowering: graph, cycles, validation, synthesis, binding.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::node::JobNode;
use crate::dag::scc::{Scc, analyze};
use crate::diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSink, Severity, TracingSink};
use crate::emit::LoweredWorkflow;
use crate::errors::Result;
use crate::lower::ast::{BodyMember, IterationConstruct, WorkflowAst};
use crate::lower::job::JobDefinition;
use crate::lower::phase::{PhaseContext, PhaseSet, synthesize};
use crate::lower::{concurrency, termination};

/// Result of lowering one workflow.
///
/// The output is best-effort: it is produced even when some constructs had
/// errors. Check [`Compilation::is_ready`] before handing it to a scheduler.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub output: LoweredWorkflow,
    pub phase_sets: Vec<PhaseSet>,
    pub components: Vec<Scc>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// No error diagnostics: the output may be handed to the scheduler.
    pub fn is_ready(&self) -> bool {
        !self.has_errors()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn phase_set(&self, construct: &str) -> Option<&PhaseSet> {
        self.phase_sets.iter().find(|p| p.construct == construct)
    }
}

/// Lower a workflow.
///
/// Returns `Err` only for fatal problems that leave no graph to work with
/// (unknown or duplicate job names) or for internal errors. Everything else
/// is reported as a diagnostic, and constructs that are not affected by an
/// error are still lowered.
pub fn lower_workflow(ast: &WorkflowAst) -> Result<Compilation> {
    let mut sink = TracingSink::new();

    // Body jobs join the graph next to ordinary jobs. A nested construct and
    // everything inside it stand in as opaque nodes so references to them
    // still resolve and the nesting is reported as a diagnostic.
    let mut nodes: Vec<JobNode> = ast.jobs.clone();
    let mut owner: HashMap<String, usize> = HashMap::new();
    for (ci, construct) in ast.constructs.iter().enumerate() {
        let mut members: Vec<JobNode> = Vec::new();
        for member in construct.body.iter() {
            match member {
                BodyMember::Job(job) => members.push(job.clone()),
                BodyMember::Nested(inner) => opaque_nodes(inner, &mut members),
            }
        }
        for node in members {
            owner.insert(node.name.clone(), ci);
            nodes.push(node);
        }
    }

    let graph = DependencyGraph::build(nodes)?;
    let components = analyze(&graph);

    let mut undeclared = vec![false; ast.constructs.len()];
    let mut order: Vec<usize> = Vec::with_capacity(ast.constructs.len());

    for component in components.iter() {
        for member in component.members.iter() {
            if let Some(&ci) = owner.get(member) {
                if !order.contains(&ci) {
                    order.push(ci);
                }
            }
        }

        if !component.is_cycle {
            continue;
        }

        let owners: BTreeSet<Option<usize>> = component
            .members
            .iter()
            .map(|m| owner.get(m).copied())
            .collect();

        let single_owner = if owners.len() == 1 {
            owners.iter().next().copied().flatten()
        } else {
            None
        };

        match single_owner {
            Some(ci) => {
                debug!(
                    loop_name = %ast.constructs[ci].name,
                    members = ?component.members,
                    "loop-carried cycle inside loop body"
                );
            }
            _ => {
                let span = component
                    .members
                    .first()
                    .and_then(|m| graph.node(m))
                    .and_then(|n| n.span);
                sink.report(
                    Diagnostic::error(
                        DiagnosticCode::CycleUndeclared,
                        format!(
                            "jobs [{}] form a dependency cycle that is not declared as a single loop",
                            component.members.join(", ")
                        ),
                    )
                    .with_span(span)
                    .with_hint("move the cyclic jobs into the body of one [loop.<name>] section"),
                );
                for ci in owners.into_iter().flatten() {
                    undeclared[ci] = true;
                }
            }
        }
    }

    // Constructs with an empty body own no graph nodes.
    for ci in 0..ast.constructs.len() {
        if !order.contains(&ci) {
            order.push(ci);
        }
    }

    let ctx = PhaseContext {
        invocation_id: &ast.invocation_id,
        timeout_minutes: ast.timeout_minutes,
    };

    let mut phase_sets: Vec<PhaseSet> = Vec::new();
    for ci in order {
        let construct = &ast.constructs[ci];
        let found = termination::validate(construct);
        let blocked = undeclared[ci] || termination::blocks_lowering(&found);
        for diagnostic in found {
            sink.report(diagnostic);
        }

        if blocked {
            warn!(loop_name = %construct.name, "loop not lowered due to structural errors");
            continue;
        }

        let bound = concurrency::bind(&ast.name, construct, &mut sink);
        let phase_set = synthesize(construct, &bound, &ctx)?;
        info!(
            loop_name = %construct.name,
            jobs = phase_set.jobs.len(),
            group = %phase_set.concurrency.group,
            unbounded = phase_set.unbounded,
            "lowered loop"
        );
        phase_sets.push(phase_set);
    }

    let ordinary: Vec<JobDefinition> = ast
        .jobs
        .iter()
        .map(|job| JobDefinition::ordinary(job, ast.timeout_minutes))
        .collect();
    let output = LoweredWorkflow::merge(&ast.name, ordinary, &phase_sets);

    let diagnostics = sink.into_inner();
    info!(
        workflow = %ast.name,
        jobs = output.jobs.len(),
        loops = phase_sets.len(),
        errors = diagnostics.iter().filter(|d| d.is_error()).count(),
        "lowering finished"
    );

    Ok(Compilation {
        output,
        phase_sets,
        components,
        diagnostics,
    })
}

fn opaque_nodes(construct: &IterationConstruct, out: &mut Vec<JobNode>) {
    out.push(JobNode {
        span: construct.span,
        ..JobNode::new(construct.name.clone())
    });
    for member in construct.body.iter() {
        match member {
            BodyMember::Job(job) => out.push(JobNode {
                span: job.span,
                ..JobNode::new(job.name.clone())
            }),
            BodyMember::Nested(inner) => opaque_nodes(inner, out),
        }
    }
}

// src/lower/phase.rs

//! Phase synthesis: one iteration construct becomes four cooperating job
//! roles that re-trigger the workflow until the loop terminates.
//!
//! One invocation of the workflow runs exactly one iteration:
//!
//! ```text
//! <loop>_hydrate -> <loop>_body_<job>... -> <loop>_decide -> <loop>_dispatch
//! ```
//!
//! The loop's back-edge is not a graph edge: `dispatch` re-triggers the whole
//! workflow with an incremented counter, and the next invocation's `hydrate`
//! downloads the state the previous `decide` persisted.

use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroU32;

use anyhow::anyhow;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;
use tracing::debug;

use crate::errors::Result;
use crate::lower::ast::IterationConstruct;
use crate::lower::concurrency::ConcurrencyConfig;
use crate::lower::job::{JobDefinition, Step, StepAction};
use crate::lower::termination;
use crate::types::{JobName, JobRole};

/// Workflow-level input naming the loop a continuation invocation belongs
/// to. Empty when the workflow was started by its original trigger.
pub const LOOP_TARGET_INPUT: &str = "loop_target";

pub fn hydrate_job_name(loop_name: &str) -> String {
    format!("{loop_name}_hydrate")
}

pub fn body_job_name(loop_name: &str, job: &str) -> String {
    format!("{loop_name}_body_{job}")
}

pub fn decide_job_name(loop_name: &str) -> String {
    format!("{loop_name}_decide")
}

pub fn dispatch_job_name(loop_name: &str) -> String {
    format!("{loop_name}_dispatch")
}

pub fn iteration_input(loop_name: &str) -> String {
    format!("{loop_name}_iteration")
}

pub fn key_input(loop_name: &str) -> String {
    format!("{loop_name}_key")
}

pub fn prev_invocation_input(loop_name: &str) -> String {
    format!("{loop_name}_prev_invocation")
}

/// A workflow trigger input added by lowering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerInput {
    pub name: String,
    pub description: String,
    pub default: String,
    pub required: bool,
}

impl TriggerInput {
    pub fn loop_target() -> Self {
        Self {
            name: LOOP_TARGET_INPUT.to_string(),
            description: "Loop continued by this invocation; empty on the original trigger"
                .to_string(),
            default: String::new(),
            required: false,
        }
    }
}

/// Loop-control inputs one construct adds to the workflow trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerExtension {
    pub inputs: Vec<TriggerInput>,
}

/// Lowering output for one iteration construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSet {
    pub construct: String,
    /// `hydrate`, body jobs in declaration order, `decide`, `dispatch`.
    pub jobs: Vec<JobDefinition>,
    pub trigger: TriggerExtension,
    pub concurrency: ConcurrencyConfig,
    pub max_iters: Option<NonZeroU32>,
    pub until: Option<String>,
    /// Set when the construct has no termination guarantee at all.
    pub unbounded: bool,
}

impl PhaseSet {
    fn job_with_role(&self, role: JobRole) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.role == role)
    }

    pub fn hydrate(&self) -> Option<&JobDefinition> {
        self.job_with_role(JobRole::Hydrate)
    }

    pub fn decide(&self) -> Option<&JobDefinition> {
        self.job_with_role(JobRole::Decide)
    }

    pub fn dispatch(&self) -> Option<&JobDefinition> {
        self.job_with_role(JobRole::Dispatch)
    }

    pub fn body_jobs(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter().filter(|j| j.role == JobRole::Body)
    }

    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }
}

/// Workflow-wide settings the synthesizer needs.
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext<'a> {
    /// Scheduler expression yielding the current invocation id.
    pub invocation_id: &'a str,
    pub timeout_minutes: Option<u32>,
}

fn scope_guard(loop_name: &str) -> String {
    format!("(inputs.{LOOP_TARGET_INPUT} == '' || inputs.{LOOP_TARGET_INPUT} == '{loop_name}')")
}

fn not_bootstrap(loop_name: &str) -> String {
    let it = iteration_input(loop_name);
    format!("inputs.{it} != '' && inputs.{it} != '0'")
}

/// Run only while nothing upstream failed. A skipped `hydrate` (bootstrap)
/// does not count as a failure.
fn upstream_ok(loop_name: &str) -> String {
    format!("{} && !failure() && !cancelled()", scope_guard(loop_name))
}

/// Lower one construct into its phase jobs.
///
/// `concurrency` is the already-bound key. `decide` persists state under
/// it and `dispatch` carries it to the next invocation, whose `hydrate`
/// reads it back from the `<loop>_key` input. Fails
/// only if the synthesized jobs would not form a DAG, which indicates a bug
/// in the synthesizer rather than in the workflow.
pub fn synthesize(
    construct: &IterationConstruct,
    concurrency: &ConcurrencyConfig,
    ctx: &PhaseContext<'_>,
) -> Result<PhaseSet> {
    let name = construct.name.as_str();
    let hydrate_name = hydrate_job_name(name);
    let decide_name = decide_job_name(name);
    let dispatch_name = dispatch_job_name(name);
    let timeout = construct.timeout_minutes.or(ctx.timeout_minutes);

    let body: Vec<_> = construct.body_jobs().collect();
    let position: BTreeMap<&str, usize> = body
        .iter()
        .enumerate()
        .map(|(i, job)| (job.name.as_str(), i))
        .collect();

    // Dependencies outside the body move onto hydrate so the whole phase
    // still waits for them.
    let mut outer_needs: Vec<JobName> = Vec::new();
    let mut body_defs: Vec<JobDefinition> = Vec::with_capacity(body.len());

    for (i, job) in body.iter().enumerate() {
        let mut needs = vec![hydrate_name.clone()];
        for dep in job.dependencies() {
            match position.get(dep) {
                Some(&j) if j < i => needs.push(body_job_name(name, dep)),
                Some(_) => debug!(
                    loop_name = name,
                    job = %job.name,
                    dep,
                    "loop-carried dependency; satisfied through hydrated state"
                ),
                None => {
                    if !outer_needs.iter().any(|n| n == dep) {
                        outer_needs.push(dep.to_string());
                    }
                }
            }
        }

        let mut steps = vec![
            Step::new(StepAction::RestoreState {
                from_job: hydrate_name.clone(),
            })
            .when(not_bootstrap(name)),
        ];
        for artifact in job.consumes.iter() {
            let producer = match position.get(artifact.job.as_str()) {
                Some(&j) if j < i => body_job_name(name, &artifact.job),
                Some(_) => continue,
                None => artifact.job.clone(),
            };
            steps.push(Step::new(StepAction::DownloadArtifact {
                job: producer,
                artifact: artifact.artifact.clone(),
            }));
        }
        steps.extend(job.steps.iter().map(|cmd| {
            Step::new(StepAction::Run {
                command: cmd.clone(),
            })
        }));
        steps.push(Step::new(StepAction::PublishState {
            job: job.name.clone(),
        }));

        body_defs.push(JobDefinition {
            name: body_job_name(name, &job.name),
            role: JobRole::Body,
            loop_name: Some(name.to_string()),
            needs,
            condition: Some(upstream_ok(name)),
            timeout_minutes: job.timeout_minutes.or(timeout),
            outputs: BTreeMap::new(),
            steps,
        });
    }

    let hydrate = JobDefinition {
        name: hydrate_name.clone(),
        role: JobRole::Hydrate,
        loop_name: Some(name.to_string()),
        needs: outer_needs,
        condition: Some(format!("{} && {}", scope_guard(name), not_bootstrap(name))),
        timeout_minutes: timeout,
        outputs: BTreeMap::new(),
        steps: vec![Step::new(StepAction::DownloadState {
            key: format!("${{{{ inputs.{} }}}}", key_input(name)),
            loop_name: name.to_string(),
            invocation: format!("${{{{ inputs.{} }}}}", prev_invocation_input(name)),
        })],
    };

    let body_names: Vec<JobName> = body_defs.iter().map(|j| j.name.clone()).collect();
    let decide = JobDefinition {
        name: decide_name.clone(),
        role: JobRole::Decide,
        loop_name: Some(name.to_string()),
        needs: body_names.clone(),
        condition: Some(upstream_ok(name)),
        timeout_minutes: timeout,
        outputs: ["terminated", "reason", "next_iteration"]
            .into_iter()
            .map(|out| {
                (
                    out.to_string(),
                    format!("${{{{ steps.decision.outputs.{out} }}}}"),
                )
            })
            .collect(),
        steps: vec![
            Step::new(StepAction::CollectState { jobs: body_names }),
            Step::new(StepAction::EvaluateDecision {
                iteration: format!("${{{{ inputs.{} || '0' }}}}", iteration_input(name)),
                max_iters: construct.max_iters.map(NonZeroU32::get),
                until: construct.until.clone(),
            })
            .with_id("decision"),
            Step::new(StepAction::PersistState {
                key: concurrency.group.clone(),
                loop_name: name.to_string(),
                invocation: ctx.invocation_id.to_string(),
            }),
        ],
    };

    let mut dispatch_condition = format!(
        "{} && needs.{decide_name}.result == 'success' && needs.{decide_name}.outputs.reason == 'continue'",
        scope_guard(name)
    );
    if let Some(cap) = construct.max_iters {
        dispatch_condition.push_str(&format!(
            " && fromJSON(needs.{decide_name}.outputs.next_iteration) < {}",
            cap.get()
        ));
    }

    let dispatch_inputs: BTreeMap<String, String> = [
        (LOOP_TARGET_INPUT.to_string(), name.to_string()),
        (
            iteration_input(name),
            format!("${{{{ needs.{decide_name}.outputs.next_iteration }}}}"),
        ),
        (key_input(name), concurrency.group.clone()),
        (prev_invocation_input(name), ctx.invocation_id.to_string()),
    ]
    .into_iter()
    .collect();

    let dispatch = JobDefinition {
        name: dispatch_name,
        role: JobRole::Dispatch,
        loop_name: Some(name.to_string()),
        needs: vec![decide_name],
        condition: Some(dispatch_condition),
        timeout_minutes: timeout,
        outputs: BTreeMap::new(),
        steps: vec![Step::new(StepAction::Dispatch {
            inputs: dispatch_inputs,
        })],
    };

    let trigger = TriggerExtension {
        inputs: vec![
            TriggerInput {
                name: iteration_input(name),
                description: format!("Completed iterations of loop '{name}'"),
                default: "0".to_string(),
                required: false,
            },
            TriggerInput {
                name: key_input(name),
                description: format!("Concurrency key of loop '{name}'"),
                default: concurrency.group.clone(),
                required: false,
            },
            TriggerInput {
                name: prev_invocation_input(name),
                description: format!("Invocation whose state loop '{name}' hydrates from"),
                default: String::new(),
                required: false,
            },
        ],
    };

    let mut jobs = Vec::with_capacity(body_defs.len() + 3);
    jobs.push(hydrate);
    jobs.extend(body_defs);
    jobs.push(decide);
    jobs.push(dispatch);

    ensure_acyclic(name, &jobs)?;

    debug!(
        loop_name = name,
        jobs = jobs.len(),
        group = %concurrency.group,
        "synthesized phase jobs"
    );

    Ok(PhaseSet {
        construct: name.to_string(),
        jobs,
        trigger,
        concurrency: concurrency.clone(),
        max_iters: construct.max_iters,
        until: construct.until.clone(),
        unbounded: termination::is_unbounded(construct),
    })
}

/// Check that the phase's own jobs form a DAG.
fn ensure_acyclic(loop_name: &str, jobs: &[JobDefinition]) -> Result<()> {
    let own: HashSet<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for job in jobs {
        graph.add_node(job.name.as_str());
    }
    for job in jobs {
        for dep in job.needs.iter().filter(|d| own.contains(d.as_str())) {
            graph.add_edge(dep.as_str(), job.name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(anyhow!(
            "internal error: phase jobs of loop '{loop_name}' contain a cycle through '{}'",
            cycle.node_id()
        )
        .into()),
    }
}

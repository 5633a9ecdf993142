// src/sim/mod.rs

//! Offline execution of lowered loops.
//!
//! The simulator plays the scheduler's part for one [`PhaseSet`]: it runs
//! each invocation's jobs in order against a [`StateStore`], follows
//! `dispatch` re-triggers, and serializes invocations that share a
//! concurrency key. User commands and the loop predicate are supplied by a
//! [`LoopModel`].
//!
//! The pure state machine lives in [`core`]; the async shell is
//! implemented in [`runtime`].
//!
//! [`PhaseSet`]: crate::lower::PhaseSet
//! [`StateStore`]: crate::state::StateStore

use crate::lower::Decision;

pub mod core;
pub mod queue;
pub mod runtime;

pub use self::core::{CoreSimulator, SimOptions, SimStep};
pub use queue::InvocationQueue;
pub use runtime::SimRuntime;

/// Identifier the simulator assigns to each invocation.
pub type InvocationId = String;

/// Loop-control inputs of one workflow invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInputs {
    /// Loop being continued; empty on the original trigger.
    pub loop_target: String,
    pub iteration: u32,
    pub key: String,
    /// Invocation whose persisted state `hydrate` reads. Empty on bootstrap.
    pub prev_invocation: String,
}

impl LoopInputs {
    /// Inputs of the original (non-dispatched) trigger.
    pub fn bootstrap(key: impl Into<String>) -> Self {
        Self {
            loop_target: String::new(),
            iteration: 0,
            key: key.into(),
            prev_invocation: String::new(),
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.iteration == 0
    }
}

/// Events flowing into the simulator.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// The workflow was triggered with these inputs.
    InvocationRequested { inputs: LoopInputs },
    /// The scheduler reports that an invocation's jobs are all done.
    InvocationFinished { invocation: InvocationId },
    ShutdownRequested,
}

/// Work the simulator asks its shell to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCommand {
    /// Trigger the workflow again (the effect of a `dispatch` job).
    Trigger { inputs: LoopInputs },
    /// Report the invocation as finished once the shell is done with it.
    Finish { invocation: InvocationId },
    RequestExit,
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    Completed,
    /// A job failed; later jobs were skipped and nothing was dispatched.
    Failed { job: String, reason: String },
}

/// Trace entry for one simulated invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRecord {
    pub invocation: InvocationId,
    pub inputs: LoopInputs,
    /// Jobs that ran, in order. Skipped jobs are not listed.
    pub jobs_run: Vec<String>,
    pub decision: Option<Decision>,
    pub dispatched: bool,
    pub outcome: InvocationOutcome,
}

impl InvocationRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome == InvocationOutcome::Completed
    }
}

/// Stand-in for the user's body commands and loop predicate.
pub trait LoopModel: Send {
    /// Run one body job's commands. Returns the state the job publishes.
    fn run_job(
        &mut self,
        loop_name: &str,
        job: &str,
        iteration: u32,
        state: &[u8],
    ) -> anyhow::Result<Vec<u8>>;

    /// Evaluate the `until` predicate after an iteration's body has run.
    fn guard_satisfied(&mut self, loop_name: &str, until: &str, iteration: u32, state: &[u8]) -> bool;
}

/// Model whose predicate becomes true at a fixed iteration.
///
/// Each body job appends `"<job>@<iteration>;"` to the state so tests can
/// see exactly which iterations' outputs were carried forward.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    satisfy_at: Option<u32>,
    fail_at: Option<(u32, String)>,
    calls: Vec<(String, u32)>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the predicate true after the body of `iteration` ran.
    pub fn satisfy_at(mut self, iteration: u32) -> Self {
        self.satisfy_at = Some(iteration);
        self
    }

    /// Make `job` fail on `iteration`.
    pub fn fail_at(mut self, iteration: u32, job: impl Into<String>) -> Self {
        self.fail_at = Some((iteration, job.into()));
        self
    }

    /// `(job, iteration)` for every body job run so far.
    pub fn calls(&self) -> &[(String, u32)] {
        &self.calls
    }
}

impl LoopModel for ScriptedModel {
    fn run_job(
        &mut self,
        _loop_name: &str,
        job: &str,
        iteration: u32,
        state: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        self.calls.push((job.to_string(), iteration));
        if let Some((at, failing)) = &self.fail_at {
            if *at == iteration && failing == job {
                anyhow::bail!("job '{job}' failed on iteration {iteration}");
            }
        }
        let mut out = state.to_vec();
        out.extend_from_slice(format!("{job}@{iteration};").as_bytes());
        Ok(out)
    }

    fn guard_satisfied(&mut self, _loop_name: &str, _until: &str, iteration: u32, _state: &[u8]) -> bool {
        self.satisfy_at.is_some_and(|at| iteration >= at)
    }
}

// src/sim/core.rs

//! Pure simulator state machine.
//!
//! Consumes [`SimEvent`]s and produces [`SimCommand`]s. It owns the queue,
//! the state store and the model but no channels or Tokio types, so it can
//! be driven synchronously in tests with [`CoreSimulator::drain`].

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info, warn};

use crate::lower::decision::{decide, should_dispatch};
use crate::lower::job::{JobDefinition, StepAction};
use crate::lower::phase::PhaseSet;
use crate::state::{self, StateEnvelope, StateStore};
use crate::types::JobRole;

use super::queue::InvocationQueue;
use super::{
    InvocationId, InvocationOutcome, InvocationRecord, LoopInputs, LoopModel, SimCommand, SimEvent,
};

/// Limits for a simulation run.
#[derive(Debug, Clone, Copy)]
pub struct SimOptions {
    /// Stop after this many invocations have started. Guards against loops
    /// without a cap whose predicate never holds.
    pub max_invocations: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            max_invocations: 1000,
        }
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimStep {
    pub commands: Vec<SimCommand>,
    pub keep_running: bool,
}

impl SimStep {
    fn continue_with(commands: Vec<SimCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    fn exit() -> Self {
        Self {
            commands: vec![SimCommand::RequestExit],
            keep_running: false,
        }
    }
}

/// Working values of one invocation while its jobs run.
#[derive(Debug, Default)]
struct InvocationState {
    hydrated: Option<StateEnvelope>,
    /// State threaded through body jobs in declaration order.
    threaded: Vec<u8>,
    published: Vec<u8>,
}

#[derive(Debug)]
pub struct CoreSimulator<S: StateStore, M: LoopModel> {
    phase_set: PhaseSet,
    store: S,
    model: M,
    queue: InvocationQueue,
    options: SimOptions,
    /// Running invocation per concurrency key.
    running: BTreeMap<String, InvocationId>,
    started: usize,
    trace: Vec<InvocationRecord>,
}

impl<S: StateStore, M: LoopModel> CoreSimulator<S, M> {
    pub fn new(phase_set: PhaseSet, store: S, model: M, options: SimOptions) -> Self {
        let queue = InvocationQueue::new(phase_set.concurrency.queue_policy);
        Self {
            phase_set,
            store,
            model,
            queue,
            options,
            running: BTreeMap::new(),
            started: 0,
            trace: Vec::new(),
        }
    }

    pub fn phase_set(&self) -> &PhaseSet {
        &self.phase_set
    }

    /// Invocations in the order they started.
    pub fn trace(&self) -> &[InvocationRecord] {
        &self.trace
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_empty()
    }

    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Bootstrap inputs using the loop's bound concurrency key.
    pub fn bootstrap_inputs(&self) -> LoopInputs {
        LoopInputs::bootstrap(self.phase_set.concurrency.group.clone())
    }

    pub fn step(&mut self, event: SimEvent) -> SimStep {
        match event {
            SimEvent::InvocationRequested { inputs } => self.handle_request(inputs),
            SimEvent::InvocationFinished { invocation } => self.handle_finished(&invocation),
            SimEvent::ShutdownRequested => SimStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }

    /// Feed events until the simulator asks to stop, looping `Trigger` and
    /// `Finish` commands back in as events.
    pub fn drain(&mut self, events: impl IntoIterator<Item = SimEvent>) {
        let mut pending: VecDeque<SimEvent> = events.into_iter().collect();
        while let Some(event) = pending.pop_front() {
            let step = self.step(event);
            for command in step.commands {
                match command {
                    SimCommand::Trigger { inputs } => {
                        pending.push_back(SimEvent::InvocationRequested { inputs })
                    }
                    SimCommand::Finish { invocation } => {
                        pending.push_back(SimEvent::InvocationFinished { invocation })
                    }
                    SimCommand::RequestExit => {}
                }
            }
            if !step.keep_running {
                break;
            }
        }
    }

    fn handle_request(&mut self, inputs: LoopInputs) -> SimStep {
        if self.running.contains_key(&inputs.key) {
            self.queue.enqueue(inputs);
            return SimStep::continue_with(Vec::new());
        }
        if self.started >= self.options.max_invocations {
            warn!(
                max_invocations = self.options.max_invocations,
                "simulation reached its invocation limit; stopping"
            );
            return SimStep::exit();
        }
        SimStep::continue_with(self.start(inputs))
    }

    fn handle_finished(&mut self, invocation: &str) -> SimStep {
        let key = self
            .running
            .iter()
            .find(|(_, id)| id.as_str() == invocation)
            .map(|(key, _)| key.clone());

        let Some(key) = key else {
            warn!(invocation, "finish reported for an invocation that is not running");
            return SimStep::continue_with(Vec::new());
        };
        self.running.remove(&key);
        debug!(invocation, key = %key, "invocation finished");

        if let Some(next) = self.queue.pop_next(&key) {
            return self.handle_request(next);
        }
        if self.running.is_empty() && self.queue.is_empty() {
            info!(invocations = self.trace.len(), "simulation idle; exiting");
            return SimStep::exit();
        }
        SimStep::continue_with(Vec::new())
    }

    fn start(&mut self, inputs: LoopInputs) -> Vec<SimCommand> {
        self.started += 1;
        let invocation = format!("inv-{}", self.started);
        self.running.insert(inputs.key.clone(), invocation.clone());

        let record = self.execute(invocation.clone(), inputs);
        info!(
            invocation = %record.invocation,
            iteration = record.inputs.iteration,
            reason = record.decision.map(|d| d.reason.as_str()).unwrap_or("-"),
            dispatched = record.dispatched,
            ok = record.succeeded(),
            "invocation ran"
        );

        let mut commands = Vec::new();
        if record.dispatched {
            if let Some(decision) = record.decision {
                commands.push(SimCommand::Trigger {
                    inputs: LoopInputs {
                        loop_target: self.phase_set.construct.clone(),
                        iteration: decision.next_iteration,
                        key: record.inputs.key.clone(),
                        prev_invocation: invocation.clone(),
                    },
                });
            }
        }
        commands.push(SimCommand::Finish { invocation });
        self.trace.push(record);
        commands
    }

    /// Run the phase jobs of one invocation in order.
    fn execute(&mut self, invocation: InvocationId, inputs: LoopInputs) -> InvocationRecord {
        let mut record = InvocationRecord {
            invocation,
            inputs,
            jobs_run: Vec::new(),
            decision: None,
            dispatched: false,
            outcome: InvocationOutcome::Completed,
        };

        let loop_name = self.phase_set.construct.clone();
        if !record.inputs.loop_target.is_empty() && record.inputs.loop_target != loop_name {
            debug!(
                loop_name = %loop_name,
                target = %record.inputs.loop_target,
                "invocation continues another loop; phase jobs skipped"
            );
            return record;
        }

        let mut scratch = InvocationState::default();
        let jobs = self.phase_set.jobs.clone();
        for job in jobs.iter() {
            if !self.job_runs(job, &record) {
                debug!(job = %job.name, "job skipped");
                continue;
            }
            record.jobs_run.push(job.name.clone());
            if let Err(reason) = self.run_job(job, &mut record, &mut scratch) {
                warn!(job = %job.name, %reason, "job failed");
                record.outcome = InvocationOutcome::Failed {
                    job: job.name.clone(),
                    reason,
                };
                record.dispatched = false;
                break;
            }
        }
        record
    }

    fn job_runs(&self, job: &JobDefinition, record: &InvocationRecord) -> bool {
        match job.role {
            JobRole::Hydrate => !record.inputs.is_bootstrap(),
            JobRole::Dispatch => record
                .decision
                .is_some_and(|d| should_dispatch(&d, self.phase_set.max_iters)),
            _ => true,
        }
    }

    fn run_job(
        &mut self,
        job: &JobDefinition,
        record: &mut InvocationRecord,
        scratch: &mut InvocationState,
    ) -> std::result::Result<(), String> {
        let loop_name = self.phase_set.construct.as_str();
        let iteration = record.inputs.iteration;
        let object = state::object_key(&record.inputs.key, loop_name);

        if job.role == JobRole::Body {
            scratch.published.clear();
        }

        for step in job.steps.iter() {
            match &step.action {
                StepAction::DownloadState { .. } => {
                    let envelope =
                        state::hydrate(&self.store, &object, &record.inputs.prev_invocation)
                            .map_err(|e| e.to_string())?;
                    scratch.threaded = envelope.payload.clone();
                    scratch.hydrated = Some(envelope);
                }
                StepAction::RestoreState { .. } => {
                    if !record.inputs.is_bootstrap() && scratch.hydrated.is_none() {
                        return Err("no hydrated state to restore".to_string());
                    }
                }
                StepAction::DownloadArtifact { job: producer, artifact } => {
                    debug!(producer = %producer, artifact = %artifact, "artifact available");
                }
                StepAction::Run { command } => {
                    debug!(job = %job.name, command = %command, "run step");
                }
                StepAction::PublishState { job: user_job } => {
                    let out = self
                        .model
                        .run_job(loop_name, user_job, iteration, &scratch.threaded)
                        .map_err(|e| e.to_string())?;
                    scratch.threaded = out.clone();
                    scratch.published = out;
                }
                StepAction::CollectState { .. } => {
                    scratch.published = scratch.threaded.clone();
                }
                StepAction::EvaluateDecision { until, .. } => {
                    let guard = until.as_deref().is_some_and(|expr| {
                        self.model
                            .guard_satisfied(loop_name, expr, iteration, &scratch.published)
                    });
                    record.decision = Some(decide(iteration, self.phase_set.max_iters, guard));
                }
                StepAction::PersistState { .. } => {
                    let envelope = StateEnvelope::new(iteration, scratch.published.clone());
                    state::persist(&mut self.store, &object, &record.invocation, &envelope)
                        .map_err(|e| e.to_string())?;
                }
                StepAction::Dispatch { .. } => {
                    record.dispatched = true;
                }
            }
        }
        Ok(())
    }
}

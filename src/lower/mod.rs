// src/lower/mod.rs

//! Cycle lowering.
//!
//! Turns a workflow whose jobs may contain declared loops into a set of
//! DAG-only jobs for a scheduler that cannot express cycles:
//!
//! - [`ast`]: validated input (`WorkflowAst`, `IterationConstruct`).
//! - [`termination`]: rejects or warns on loops that may not terminate.
//! - [`concurrency`]: binds the key that serializes a loop's invocations.
//! - [`phase`]: synthesizes the hydrate / body / decide / dispatch jobs.
//! - [`decision`]: runtime semantics of decide and dispatch.
//! - [`job`]: the scheduler-neutral job definitions everything produces.
//! - [`pipeline`]: runs the stages in order and collects diagnostics.

pub mod ast;
pub mod concurrency;
pub mod decision;
pub mod job;
pub mod phase;
pub mod pipeline;
pub mod termination;

pub use ast::{BodyMember, IterationConstruct, WorkflowAst};
pub use concurrency::ConcurrencyConfig;
pub use decision::{Decision, decide, should_dispatch};
pub use job::{JobDefinition, Step, StepAction};
pub use phase::{PhaseContext, PhaseSet, TriggerExtension, TriggerInput};
pub use pipeline::{Compilation, lower_workflow};

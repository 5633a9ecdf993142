use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical job name type used throughout the compiler.
pub type JobName = String;

/// What happens when a loop invocation is triggered while another invocation
/// with the same concurrency key is still running.
///
/// Only one policy exists: overlapping invocations are serialized and never
/// discarded. Discarding one would silently shorten the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueuePolicy {
    #[default]
    #[serde(rename = "serialize-no-cancel")]
    SerializeNoCancel,
}

impl QueuePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueuePolicy::SerializeNoCancel => "serialize-no-cancel",
        }
    }
}

impl fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code written by a `decide` job.
///
/// `Continue` is not terminal but shares the vocabulary so downstream
/// consumers can branch on a single output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    GuardSatisfied,
    MaxIterations,
    Continue,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::GuardSatisfied => "guard_satisfied",
            DecisionReason::MaxIterations => "max_iterations",
            DecisionReason::Continue => "continue",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DecisionReason::Continue)
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a job in the lowered workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRole {
    /// A job that was not part of any iteration construct.
    Ordinary,
    Hydrate,
    Body,
    Decide,
    Dispatch,
}

// src/sim/queue.rs

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use crate::types::QueuePolicy;

use super::LoopInputs;

/// Invocation requests waiting for their concurrency key to become free.
///
/// Semantics (`serialize-no-cancel`):
/// - at most one invocation per key runs at a time;
/// - a request for a busy key waits in a FIFO for that key;
/// - nothing is ever dropped or merged. Every queued request eventually
///   runs, in arrival order, so no iteration of a loop is lost.
///
/// Requests for different keys are independent.
#[derive(Debug, Default)]
pub struct InvocationQueue {
    policy: QueuePolicy,
    pending: BTreeMap<String, VecDeque<LoopInputs>>,
}

impl InvocationQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            policy,
            pending: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    /// Returns true if no key has waiting requests.
    pub fn is_empty(&self) -> bool {
        self.pending.values().all(VecDeque::is_empty)
    }

    /// Number of requests waiting across all keys.
    pub fn len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    /// Append a request behind everything already waiting on its key.
    pub fn enqueue(&mut self, inputs: LoopInputs) {
        let key = inputs.key.clone();
        let waiting = self.pending.entry(key.clone()).or_default();
        waiting.push_back(inputs);
        debug!(
            key = %key,
            waiting = waiting.len(),
            policy = %self.policy,
            "queued invocation behind running one"
        );
    }

    /// Take the oldest request waiting on `key`.
    pub fn pop_next(&mut self, key: &str) -> Option<LoopInputs> {
        let waiting = self.pending.get_mut(key)?;
        let next = waiting.pop_front();
        if waiting.is_empty() {
            self.pending.remove(key);
        }
        next
    }
}

// src/lower/decision.rs

//! Runtime semantics of the `decide` and `dispatch` jobs.
//!
//! The synthesized jobs encode these rules as scheduler expressions; the
//! functions here are the reference the simulator executes and the tests
//! check against.

use std::num::NonZeroU32;

use crate::types::DecisionReason;

/// Outcome of one `decide` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub reason: DecisionReason,
    /// Counter carried to the next invocation.
    pub next_iteration: u32,
}

impl Decision {
    pub fn terminated(&self) -> bool {
        self.reason.is_terminal()
    }
}

/// Evaluate the decision for the invocation whose counter is `iteration`
/// (0 on bootstrap).
///
/// A satisfied predicate wins over the cap; the cap is reached once
/// `iteration + 1` iterations have completed.
pub fn decide(iteration: u32, max_iters: Option<NonZeroU32>, guard_satisfied: bool) -> Decision {
    let next_iteration = iteration.saturating_add(1);

    let reason = if guard_satisfied {
        DecisionReason::GuardSatisfied
    } else if max_iters.is_some_and(|cap| next_iteration >= cap.get()) {
        DecisionReason::MaxIterations
    } else {
        DecisionReason::Continue
    };

    Decision {
        reason,
        next_iteration,
    }
}

/// Whether `dispatch` schedules another invocation.
///
/// Both conditions must hold: the decision is `continue` AND the next
/// counter is still below the cap, when one is configured.
pub fn should_dispatch(decision: &Decision, max_iters: Option<NonZeroU32>) -> bool {
    let wants_more = decision.reason == DecisionReason::Continue;
    let below_cap = max_iters.is_none_or(|cap| decision.next_iteration < cap.get());
    wants_more && below_cap
}

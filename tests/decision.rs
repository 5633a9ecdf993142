// tests/decision.rs

use std::num::NonZeroU32;

use proptest::prelude::*;

use loopdag::lower::{decide, should_dispatch};
use loopdag::types::DecisionReason;

fn cap(n: u32) -> Option<NonZeroU32> {
    NonZeroU32::new(n)
}

#[test]
fn cap_of_three_stops_after_the_third_iteration() {
    // Predicate never satisfied: iterations 0, 1, 2 run, then stop.
    let first = decide(0, cap(3), false);
    assert_eq!(first.reason, DecisionReason::Continue);
    assert!(should_dispatch(&first, cap(3)));

    let second = decide(1, cap(3), false);
    assert_eq!(second.next_iteration, 2);
    assert!(should_dispatch(&second, cap(3)));

    let third = decide(2, cap(3), false);
    assert_eq!(third.reason, DecisionReason::MaxIterations);
    assert_eq!(third.reason.as_str(), "max_iterations");
    assert!(third.terminated());
    assert!(!should_dispatch(&third, cap(3)));
}

#[test]
fn satisfied_predicate_wins_over_the_cap() {
    let decision = decide(2, cap(3), true);
    assert_eq!(decision.reason, DecisionReason::GuardSatisfied);
    assert!(!should_dispatch(&decision, cap(3)));
}

#[test]
fn cap_of_one_never_dispatches() {
    let decision = decide(0, cap(1), false);
    assert_eq!(decision.reason, DecisionReason::MaxIterations);
    assert!(!should_dispatch(&decision, cap(1)));
}

#[test]
fn without_a_cap_only_the_predicate_stops_the_loop() {
    let decision = decide(10_000, None, false);
    assert_eq!(decision.reason, DecisionReason::Continue);
    assert!(should_dispatch(&decision, None));
}

proptest! {
    #[test]
    fn dispatch_requires_continue_and_headroom(
        iteration in 0u32..200,
        max in proptest::option::of(1u32..100),
        guard in any::<bool>(),
    ) {
        let max_iters = max.and_then(NonZeroU32::new);
        let decision = decide(iteration, max_iters, guard);
        let dispatched = should_dispatch(&decision, max_iters);

        if dispatched {
            prop_assert_eq!(decision.reason, DecisionReason::Continue);
            prop_assert!(!guard);
            if let Some(cap) = max_iters {
                prop_assert!(decision.next_iteration < cap.get());
            }
        }
        if let Some(cap) = max_iters {
            if iteration + 1 >= cap.get() {
                prop_assert!(!dispatched);
            }
        }
        prop_assert_eq!(decision.next_iteration, iteration + 1);
    }
}

// tests/simulator.rs

mod common;
use crate::common::{TestResult, compile_toml, init_tracing, with_timeout};

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use loopdag::lower::PhaseSet;
use loopdag::sim::{
    CoreSimulator, InvocationOutcome, LoopInputs, ScriptedModel, SimCommand, SimEvent, SimOptions,
    SimRuntime,
};
use loopdag::state::{MemoryStateStore, StateDownload, StateStore, object_key};
use loopdag::types::DecisionReason;
use loopdag_test_utils::recording_model::{RecordedRun, RecordingModel};

const CAPPED: &str = r#"
[workflow]
name = "ci"

[loop.refine]
max_iters = 3
until = "score > 0.9"
concurrency = "refine"

[[loop.refine.body]]
name = "analyze"
steps = ["./analyze.sh"]

[[loop.refine.body]]
name = "improve"
steps = ["./improve.sh"]
needs = ["analyze"]
"#;

fn phase_set(source: &str, loop_name: &str) -> Result<PhaseSet, Box<dyn std::error::Error>> {
    let compilation = compile_toml(source)?;
    compilation
        .phase_set(loop_name)
        .cloned()
        .ok_or_else(|| "loop not lowered".into())
}

async fn run_sim<S: StateStore, M: loopdag::sim::LoopModel>(
    core: CoreSimulator<S, M>,
    seeds: Vec<LoopInputs>,
) -> Result<CoreSimulator<S, M>, Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::channel::<SimEvent>(64);
    for inputs in seeds {
        tx.send(SimEvent::InvocationRequested { inputs }).await?;
    }
    let runtime = SimRuntime::new(core, tx, rx);
    Ok(with_timeout(runtime.run()).await?)
}

#[tokio::test]
async fn cap_stops_the_loop_after_three_iterations() -> TestResult {
    init_tracing();

    let core = CoreSimulator::new(
        phase_set(CAPPED, "refine")?,
        MemoryStateStore::new(),
        ScriptedModel::new(),
        SimOptions::default(),
    );
    let seed = core.bootstrap_inputs();
    let core = run_sim(core, vec![seed]).await?;

    let trace = core.trace();
    assert_eq!(trace.len(), 3);
    let iterations: Vec<u32> = trace.iter().map(|r| r.inputs.iteration).collect();
    assert_eq!(iterations, vec![0, 1, 2]);

    let last = trace.last().expect("three invocations");
    assert_eq!(
        last.decision.map(|d| d.reason),
        Some(DecisionReason::MaxIterations)
    );
    assert!(!last.dispatched);
    assert!(!last.jobs_run.contains(&"refine_dispatch".to_string()));
    assert!(trace.iter().all(|r| r.succeeded()));

    // Bootstrap skips hydrate; later invocations run it.
    assert!(!trace[0].jobs_run.contains(&"refine_hydrate".to_string()));
    assert_eq!(trace[1].jobs_run[0], "refine_hydrate");
    Ok(())
}

#[test]
fn state_is_stored_per_loop_under_the_shared_key() -> TestResult {
    let mut core = CoreSimulator::new(
        phase_set(CAPPED, "refine")?,
        MemoryStateStore::new(),
        ScriptedModel::new().satisfy_at(0),
        SimOptions::default(),
    );
    let seed = core.bootstrap_inputs();
    core.drain([SimEvent::InvocationRequested { inputs: seed }]);

    let store = core.store();
    assert_eq!(store.len(), 1);
    assert!(matches!(
        store.download(&object_key("refine", "refine"), "inv-1")?,
        StateDownload::Found(_)
    ));
    assert_eq!(store.download("refine", "inv-1")?, StateDownload::NotFound);
    Ok(())
}

#[tokio::test]
async fn satisfied_predicate_stops_early() -> TestResult {
    let core = CoreSimulator::new(
        phase_set(CAPPED, "refine")?,
        MemoryStateStore::new(),
        ScriptedModel::new().satisfy_at(1),
        SimOptions::default(),
    );
    let seed = core.bootstrap_inputs();
    let core = run_sim(core, vec![seed]).await?;

    let trace = core.trace();
    assert_eq!(trace.len(), 2);
    assert_eq!(
        trace[1].decision.map(|d| d.reason),
        Some(DecisionReason::GuardSatisfied)
    );
    Ok(())
}

#[tokio::test]
async fn state_is_carried_between_invocations() -> TestResult {
    let runs = Arc::new(Mutex::new(Vec::new()));
    let core = CoreSimulator::new(
        phase_set(CAPPED, "refine")?,
        MemoryStateStore::new(),
        RecordingModel::new(None, Arc::clone(&runs)),
        SimOptions::default(),
    );
    let seed = core.bootstrap_inputs();
    run_sim(core, vec![seed]).await?;

    let runs = runs.lock().unwrap().clone();
    assert_eq!(runs.len(), 6);
    assert_eq!(
        runs[0],
        RecordedRun {
            job: "analyze".to_string(),
            iteration: 0,
            state_in: String::new(),
        }
    );
    // improve sees what analyze produced in the same invocation.
    assert_eq!(runs[1].state_in, "|analyze#0");
    // The next invocation's first job sees the previous iteration's result.
    assert_eq!(runs[2].state_in, "|analyze#0|improve#0");
    assert_eq!(runs[2].iteration, 1);
    Ok(())
}

#[tokio::test]
async fn failing_body_job_stops_without_dispatch() -> TestResult {
    let core = CoreSimulator::new(
        phase_set(CAPPED, "refine")?,
        MemoryStateStore::new(),
        ScriptedModel::new().fail_at(1, "analyze"),
        SimOptions::default(),
    );
    let seed = core.bootstrap_inputs();
    let core = run_sim(core, vec![seed]).await?;

    let trace = core.trace();
    assert_eq!(trace.len(), 2);
    match &trace[1].outcome {
        InvocationOutcome::Failed { job, reason } => {
            assert_eq!(job, "refine_body_analyze");
            assert!(reason.contains("failed on iteration 1"));
        }
        other => panic!("Expected failure, got: {:?}", other),
    }
    assert!(!trace[1].dispatched);
    assert!(trace[1].decision.is_none());
    Ok(())
}

#[test]
fn missing_state_fails_hydrate_instead_of_starting_fresh() -> TestResult {
    let mut core = CoreSimulator::new(
        phase_set(CAPPED, "refine")?,
        MemoryStateStore::new(),
        ScriptedModel::new(),
        SimOptions::default(),
    );
    // A continuation whose predecessor never persisted anything.
    let orphan = LoopInputs {
        loop_target: "refine".to_string(),
        iteration: 1,
        key: "refine".to_string(),
        prev_invocation: "lost-run".to_string(),
    };
    core.drain([SimEvent::InvocationRequested { inputs: orphan }]);

    let trace = core.trace();
    assert_eq!(trace.len(), 1);
    match &trace[0].outcome {
        InvocationOutcome::Failed { job, reason } => {
            assert_eq!(job, "refine_hydrate");
            assert!(reason.contains("no iteration state"), "reason: {reason}");
        }
        other => panic!("Expected hydrate failure, got: {:?}", other),
    }
    assert_eq!(trace[0].jobs_run, vec!["refine_hydrate".to_string()]);
    Ok(())
}

#[test]
fn overlapping_requests_on_one_key_are_serialized_not_dropped() -> TestResult {
    let mut core = CoreSimulator::new(
        phase_set(CAPPED, "refine")?,
        MemoryStateStore::new(),
        ScriptedModel::new().satisfy_at(0),
        SimOptions::default(),
    );

    let first = core.step(SimEvent::InvocationRequested {
        inputs: core.bootstrap_inputs(),
    });
    assert_eq!(
        first.commands,
        vec![SimCommand::Finish {
            invocation: "inv-1".to_string()
        }]
    );

    // Two more triggers arrive while inv-1 still holds the key.
    for _ in 0..2 {
        let step = core.step(SimEvent::InvocationRequested {
            inputs: core.bootstrap_inputs(),
        });
        assert!(step.commands.is_empty());
        assert!(step.keep_running);
    }
    assert!(!core.queue_is_empty());
    assert_eq!(core.trace().len(), 1);

    core.drain([SimEvent::InvocationFinished {
        invocation: "inv-1".to_string(),
    }]);

    let ids: Vec<&str> = core.trace().iter().map(|r| r.invocation.as_str()).collect();
    assert_eq!(ids, vec!["inv-1", "inv-2", "inv-3"]);
    assert!(core.is_idle());
    assert!(core.queue_is_empty());
    Ok(())
}

#[test]
fn continuation_for_another_loop_skips_this_one() -> TestResult {
    let mut core = CoreSimulator::new(
        phase_set(CAPPED, "refine")?,
        MemoryStateStore::new(),
        ScriptedModel::new(),
        SimOptions::default(),
    );
    let foreign = LoopInputs {
        loop_target: "other".to_string(),
        ..core.bootstrap_inputs()
    };
    core.drain([SimEvent::InvocationRequested { inputs: foreign }]);

    assert_eq!(core.trace().len(), 1);
    assert!(core.trace()[0].jobs_run.is_empty());
    assert!(core.model().calls().is_empty());
    Ok(())
}

#[test]
fn invocation_limit_stops_unbounded_loops() -> TestResult {
    let source = r#"
[workflow]
name = "ci"

[loop.spin]
concurrency = "spin"

[[loop.spin.body]]
name = "work"
steps = ["./work.sh"]
"#;
    let compilation = compile_toml(source)?;
    assert!(!compilation.is_ready());
    let phase_set = compilation.phase_set("spin").cloned().ok_or("not lowered")?;

    let mut core = CoreSimulator::new(
        phase_set,
        MemoryStateStore::new(),
        ScriptedModel::new(),
        SimOptions { max_invocations: 4 },
    );
    let seed = core.bootstrap_inputs();
    core.drain([SimEvent::InvocationRequested { inputs: seed }]);

    assert_eq!(core.trace().len(), 4);
    assert!(core.trace().iter().all(|r| r.dispatched));
    Ok(())
}

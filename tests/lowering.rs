// tests/lowering.rs

mod common;
use crate::common::{REFINE_WORKFLOW, TestResult, compile_toml, init_tracing};

use std::collections::BTreeSet;

use loopdag::dag::JobNode;
use loopdag::diagnostics::{DiagnosticCode, Severity};
use loopdag::lower::termination;
use loopdag::lower::{IterationConstruct, JobDefinition, StepAction, WorkflowAst, lower_workflow};
use loopdag::types::JobRole;

fn persisted_object(decide: &JobDefinition) -> Option<(String, String, String)> {
    decide.steps.iter().find_map(|s| match &s.action {
        StepAction::PersistState {
            key,
            loop_name,
            invocation,
        } => Some((key.clone(), loop_name.clone(), invocation.clone())),
        _ => None,
    })
}

fn assert_unique_job_names(compilation: &loopdag::lower::Compilation) {
    let names = compilation.output.job_names();
    let unique: BTreeSet<&str> = names.iter().copied().collect();
    assert_eq!(unique.len(), names.len(), "duplicate job names: {names:?}");
}

fn codes(compilation: &loopdag::lower::Compilation) -> Vec<(DiagnosticCode, Severity)> {
    compilation
        .diagnostics
        .iter()
        .map(|d| (d.code, d.severity))
        .collect()
}

#[test]
fn refine_loop_yields_four_phase_jobs_and_only_a_key_warning() -> TestResult {
    init_tracing();

    let compilation = compile_toml(REFINE_WORKFLOW)?;
    assert!(compilation.is_ready());
    assert_eq!(
        codes(&compilation),
        vec![(DiagnosticCode::CycleNoKey, Severity::Warning)]
    );

    let phase_set = compilation.phase_set("refine").expect("refine lowered");
    assert_eq!(
        phase_set.job_names(),
        vec![
            "refine_hydrate",
            "refine_body_analyze",
            "refine_decide",
            "refine_dispatch"
        ]
    );
    assert_eq!(phase_set.concurrency.group, "ci-refine");
    assert!(!phase_set.unbounded);

    let inputs: Vec<&str> = phase_set
        .trigger
        .inputs
        .iter()
        .map(|i| i.name.as_str())
        .collect();
    assert_eq!(
        inputs,
        vec!["refine_iteration", "refine_key", "refine_prev_invocation"]
    );

    // Ordinary jobs pass through untouched, ahead of the loop's jobs.
    let output = &compilation.output;
    assert_eq!(output.job_names()[0], "build");
    assert_eq!(output.job("build").map(|j| j.role), Some(JobRole::Ordinary));
    assert_eq!(output.trigger.inputs[0].name, "loop_target");
    Ok(())
}

#[test]
fn explicit_key_leaves_no_diagnostics() -> TestResult {
    let source = REFINE_WORKFLOW.replace(
        "until = \"quality_score > 0.95\"",
        "until = \"quality_score > 0.95\"\nconcurrency = \"refine-${{ github.ref }}\"",
    );
    let compilation = compile_toml(&source)?;

    assert!(compilation.diagnostics.is_empty());
    let phase_set = compilation.phase_set("refine").expect("refine lowered");
    assert_eq!(phase_set.concurrency.group, "refine-${{ github.ref }}");
    assert!(phase_set.concurrency.is_dynamic());
    Ok(())
}

#[test]
fn outer_dependencies_move_onto_hydrate() -> TestResult {
    let compilation = compile_toml(REFINE_WORKFLOW)?;
    let phase_set = compilation.phase_set("refine").expect("refine lowered");

    let hydrate = phase_set.hydrate().expect("hydrate");
    assert_eq!(hydrate.needs, vec!["build".to_string()]);

    let body = phase_set.job("refine_body_analyze").expect("body job");
    assert_eq!(body.needs, vec!["refine_hydrate".to_string()]);

    let decide = phase_set.decide().expect("decide");
    assert_eq!(decide.needs, vec!["refine_body_analyze".to_string()]);
    assert_eq!(
        phase_set.dispatch().map(|d| d.needs.clone()),
        Some(vec!["refine_decide".to_string()])
    );
    Ok(())
}

#[test]
fn decide_persists_state_under_the_bound_key() -> TestResult {
    let compilation = compile_toml(REFINE_WORKFLOW)?;
    let phase_set = compilation.phase_set("refine").expect("refine lowered");
    let decide = phase_set.decide().expect("decide");

    assert_eq!(
        persisted_object(decide),
        Some((
            "ci-refine".to_string(),
            "refine".to_string(),
            "${{ github.run_id }}".to_string()
        ))
    );

    // hydrate reads the key the previous dispatch carried forward.
    let hydrate = phase_set.hydrate().expect("hydrate");
    match &hydrate.steps[0].action {
        StepAction::DownloadState {
            key,
            loop_name,
            invocation,
        } => {
            assert_eq!(key, "${{ inputs.refine_key }}");
            assert_eq!(loop_name, "refine");
            assert_eq!(invocation, "${{ inputs.refine_prev_invocation }}");
        }
        other => panic!("Expected DownloadState, got: {:?}", other),
    }
    let dispatch = phase_set.dispatch().expect("dispatch");
    match &dispatch.steps[0].action {
        StepAction::Dispatch { inputs } => {
            assert_eq!(inputs.get("refine_key").map(String::as_str), Some("ci-refine"));
        }
        other => panic!("Expected Dispatch, got: {:?}", other),
    }
    Ok(())
}

#[test]
fn dispatch_condition_requires_continue_and_headroom() -> TestResult {
    let compilation = compile_toml(REFINE_WORKFLOW)?;
    let phase_set = compilation.phase_set("refine").expect("refine lowered");
    let condition = phase_set
        .dispatch()
        .and_then(|d| d.condition.clone())
        .expect("dispatch has a condition");

    assert!(condition.contains("needs.refine_decide.outputs.reason == 'continue'"));
    assert!(condition.contains("fromJSON(needs.refine_decide.outputs.next_iteration) < 5"));
    assert!(condition.contains(" && "));
    Ok(())
}

#[test]
fn loop_carried_dependencies_are_not_graph_edges() -> TestResult {
    // improve feeds the next iteration's analyze; analyze feeds improve.
    let source = r#"
[workflow]
name = "ci"

[loop.refine]
max_iters = 3
concurrency = "refine"

[[loop.refine.body]]
name = "analyze"
steps = ["./analyze.sh"]
needs = ["improve"]

[[loop.refine.body]]
name = "improve"
steps = ["./improve.sh"]
consumes = [{ job = "analyze", artifact = "report" }]
"#;
    let compilation = compile_toml(source)?;
    assert!(compilation.is_ready(), "{:?}", compilation.diagnostics);

    let cycle = compilation
        .components
        .iter()
        .find(|c| c.is_cycle)
        .expect("body forms a cycle");
    assert_eq!(cycle.len(), 2);

    let phase_set = compilation.phase_set("refine").expect("refine lowered");
    let analyze = phase_set.job("refine_body_analyze").expect("analyze");
    assert_eq!(analyze.needs, vec!["refine_hydrate".to_string()]);

    let improve = phase_set.job("refine_body_improve").expect("improve");
    assert_eq!(
        improve.needs,
        vec!["refine_hydrate".to_string(), "refine_body_analyze".to_string()]
    );
    assert!(improve.steps.iter().any(|s| matches!(
        &s.action,
        StepAction::DownloadArtifact { job, artifact }
            if job == "refine_body_analyze" && artifact == "report"
    )));
    Ok(())
}

#[test]
fn two_constructs_are_not_cross_wired() -> TestResult {
    let source = r#"
[workflow]
name = "ci"

[loop.alpha]
max_iters = 2
concurrency = "alpha-key"

[[loop.alpha.body]]
name = "a1"
steps = ["./a1.sh"]

[loop.beta]
max_iters = 4
concurrency = "beta-key"

[[loop.beta.body]]
name = "b1"
steps = ["./b1.sh"]
"#;
    let compilation = compile_toml(source)?;
    assert!(compilation.is_ready());
    assert_eq!(compilation.phase_sets.len(), 2);

    for (mine, other) in [("alpha", "beta"), ("beta", "alpha")] {
        let phase_set = compilation.phase_set(mine).expect("lowered");
        let rendered = format!("{:?}", phase_set.jobs);
        assert!(
            !rendered.contains(&format!("{other}_")),
            "{mine} references {other}: {rendered}"
        );
        for input in phase_set.trigger.inputs.iter() {
            assert!(input.name.starts_with(mine));
        }
    }

    let groups: Vec<&str> = compilation
        .output
        .concurrency
        .iter()
        .map(|c| c.group.as_str())
        .collect();
    assert_eq!(groups, vec!["alpha-key", "beta-key"]);
    assert_unique_job_names(&compilation);
    Ok(())
}

#[test]
fn loops_sharing_a_key_keep_separate_state() -> TestResult {
    let source = r#"
[workflow]
name = "ci"

[loop.alpha]
max_iters = 2
concurrency = "shared"

[[loop.alpha.body]]
name = "a1"
steps = ["./a1.sh"]

[loop.beta]
max_iters = 4
concurrency = "shared"

[[loop.beta.body]]
name = "b1"
steps = ["./b1.sh"]
"#;
    let compilation = compile_toml(source)?;
    assert!(compilation.is_ready());
    assert_unique_job_names(&compilation);

    let mut objects = Vec::new();
    for name in ["alpha", "beta"] {
        let phase_set = compilation.phase_set(name).expect("lowered");
        assert_eq!(phase_set.concurrency.group, "shared");

        let (key, loop_name, _) = persisted_object(phase_set.decide().expect("decide"))
            .expect("decide persists state");
        assert_eq!(loop_name, name);

        match &phase_set.hydrate().expect("hydrate").steps[0].action {
            StepAction::DownloadState { loop_name, .. } => assert_eq!(loop_name, name),
            other => panic!("Expected DownloadState, got: {:?}", other),
        }
        objects.push((key, loop_name));
    }
    assert_ne!(objects[0], objects[1]);
    Ok(())
}

#[test]
fn explicit_key_equal_to_another_default_does_not_share_state() -> TestResult {
    let source = r#"
[workflow]
name = "ci"

[loop.alpha]
max_iters = 2
concurrency = "ci-beta"

[[loop.alpha.body]]
name = "a1"
steps = ["./a1.sh"]

[loop.beta]
max_iters = 2

[[loop.beta.body]]
name = "b1"
steps = ["./b1.sh"]
"#;
    let compilation = compile_toml(source)?;
    assert!(compilation.is_ready());
    assert_unique_job_names(&compilation);

    let alpha = compilation.phase_set("alpha").expect("alpha lowered");
    let beta = compilation.phase_set("beta").expect("beta lowered");
    assert_eq!(alpha.concurrency.group, beta.concurrency.group);

    let alpha_object = persisted_object(alpha.decide().expect("decide"));
    let beta_object = persisted_object(beta.decide().expect("decide"));
    assert_ne!(alpha_object, beta_object);
    Ok(())
}

#[test]
fn undeclared_cycle_between_ordinary_jobs_is_an_error() -> TestResult {
    let source = r#"
[workflow]
name = "ci"

[job.a]
steps = ["echo a"]
needs = ["b"]

[job.b]
steps = ["echo b"]
needs = ["a"]
"#;
    let compilation = compile_toml(source)?;

    assert!(!compilation.is_ready());
    let errors: Vec<_> = compilation.errors().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, DiagnosticCode::CycleUndeclared);
    assert!(errors[0].message.contains("a, b"));
    Ok(())
}

#[test]
fn undeclared_cycle_blocks_only_the_constructs_it_touches() -> TestResult {
    // Built directly: the file format cannot express an ordinary job that
    // depends on a body job.
    let ast = WorkflowAst::new("ci")
        .job(JobNode::new("gate").needs("inner"))
        .construct(
            IterationConstruct::new("tangled")
                .max_iters(2)
                .concurrency("tangled")
                .job(JobNode::new("inner").needs("gate")),
        )
        .construct(
            IterationConstruct::new("clean")
                .max_iters(2)
                .concurrency("clean")
                .job(JobNode::new("work")),
        );

    let compilation = lower_workflow(&ast)?;
    assert_eq!(
        codes(&compilation),
        vec![(DiagnosticCode::CycleUndeclared, Severity::Error)]
    );
    assert!(compilation.phase_set("tangled").is_none());
    assert!(compilation.phase_set("clean").is_some());
    Ok(())
}

#[test]
fn no_cap_and_no_predicate_is_an_error_but_still_lowered_unbounded() -> TestResult {
    let construct = IterationConstruct::new("forever").job(JobNode::new("spin"));
    let found = termination::validate(&construct);

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].code, DiagnosticCode::CycleNoTermination);
    assert!(found[0].is_error());
    assert!(!termination::blocks_lowering(&found));

    let compilation = lower_workflow(&WorkflowAst::new("ci").construct(construct.concurrency("k")))?;
    assert!(!compilation.is_ready());
    let phase_set = compilation.phase_set("forever").expect("still lowered");
    assert!(phase_set.unbounded);
    Ok(())
}

#[test]
fn predicate_without_cap_is_a_warning() -> TestResult {
    let construct = IterationConstruct::new("until_only")
        .until("done == true")
        .concurrency("k")
        .job(JobNode::new("step"));

    let found = termination::validate(&construct);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].code, DiagnosticCode::CycleNoTermination);
    assert_eq!(found[0].severity, Severity::Warning);

    let compilation = lower_workflow(&WorkflowAst::new("ci").construct(construct))?;
    assert!(compilation.is_ready());
    let phase_set = compilation.phase_set("until_only").expect("lowered");
    assert!(!phase_set.unbounded);
    let dispatch = phase_set.dispatch().and_then(|d| d.condition.clone());
    assert!(dispatch.is_some_and(|c| !c.contains("fromJSON")));
    Ok(())
}

#[test]
fn empty_body_is_rejected_without_body_jobs() -> TestResult {
    let source = r#"
[workflow]
name = "ci"

[job.build]
steps = ["cargo build"]

[loop.hollow]
max_iters = 3
concurrency = "hollow"
"#;
    let compilation = compile_toml(source)?;

    assert_eq!(
        codes(&compilation),
        vec![(DiagnosticCode::CycleEmptyBody, Severity::Error)]
    );
    assert!(compilation.phase_set("hollow").is_none());
    assert!(
        compilation
            .output
            .job_names()
            .iter()
            .all(|n| !n.starts_with("hollow_"))
    );
    Ok(())
}

#[test]
fn nested_construct_is_rejected() -> TestResult {
    let source = r#"
[workflow]
name = "ci"

[loop.outer]
max_iters = 3
concurrency = "outer"

[[loop.outer.body]]
name = "step"
steps = ["./step.sh"]

[[loop.outer.body]]
name = "inner"
max_iters = 2
body = [{ name = "deep", steps = ["./deep.sh"] }]
"#;
    let compilation = compile_toml(source)?;

    let nested: Vec<_> = compilation
        .errors()
        .filter(|d| d.code == DiagnosticCode::CycleNested)
        .collect();
    assert_eq!(nested.len(), 1);
    assert!(nested[0].message.contains("'inner'"));
    assert!(compilation.phase_set("outer").is_none());
    Ok(())
}

#[test]
fn sibling_depending_on_a_nested_job_still_reports_the_nesting() -> TestResult {
    let source = r#"
[workflow]
name = "ci"

[loop.outer]
max_iters = 3
concurrency = "outer"

[[loop.outer.body]]
name = "inner"
max_iters = 2
body = [{ name = "deep", steps = ["./deep.sh"] }]

[[loop.outer.body]]
name = "after"
steps = ["./after.sh"]
needs = ["deep"]
"#;
    let compilation = compile_toml(source)?;

    assert_eq!(
        codes(&compilation),
        vec![(DiagnosticCode::CycleNested, Severity::Error)]
    );
    assert!(compilation.phase_set("outer").is_none());
    assert!(!compilation.is_ready());
    Ok(())
}

#[test]
fn diagnostics_point_at_the_loop_table() -> TestResult {
    let source = "[workflow]\nname = \"ci\"\n\n[loop.hollow]\nmax_iters = 1\n";
    let workflow = loopdag::config::load_str(source)?;
    let compilation = loopdag::compile(&workflow)?;

    let diagnostic = compilation.errors().next().expect("empty body error");
    let rendered =
        loopdag::diagnostics::render(diagnostic, "Loopdag.toml", workflow.source.as_deref());
    assert!(rendered.starts_with("error[CYCLE_EMPTY_BODY]"));
    assert!(rendered.contains("--> Loopdag.toml:"));
    assert!(rendered.contains("= hint:"));
    Ok(())
}

// tests/emit.rs

mod common;
use crate::common::{REFINE_WORKFLOW, TestResult, compile_toml, init_tracing};

use loopdag::emit::{fingerprint, render_toml};

#[test]
fn same_input_renders_identical_bytes() -> TestResult {
    init_tracing();

    let first = render_toml(&compile_toml(REFINE_WORKFLOW)?.output)?;
    let second = render_toml(&compile_toml(REFINE_WORKFLOW)?.output)?;

    assert_eq!(first, second);
    assert_eq!(fingerprint(&first), fingerprint(&second));
    assert_eq!(fingerprint(&first).len(), 64);
    Ok(())
}

#[test]
fn rendered_document_carries_loop_wiring() -> TestResult {
    let rendered = render_toml(&compile_toml(REFINE_WORKFLOW)?.output)?;

    for needle in [
        "refine_hydrate",
        "refine_body_analyze",
        "refine_decide",
        "refine_dispatch",
        "serialize-no-cancel",
        "ci-refine",
        "action = \"persist_state\"",
        "action = \"dispatch\"",
        "quality_score > 0.95",
    ] {
        assert!(rendered.contains(needle), "missing {needle:?} in:\n{rendered}");
    }

    // The emitted document is itself valid TOML.
    let parsed: toml::Table = toml::from_str(&rendered)?;
    assert_eq!(parsed.get("name").and_then(|v| v.as_str()), Some("ci"));
    Ok(())
}

#[test]
fn different_caps_change_the_fingerprint() -> TestResult {
    let other = REFINE_WORKFLOW.replace("max_iters = 5", "max_iters = 6");

    let a = render_toml(&compile_toml(REFINE_WORKFLOW)?.output)?;
    let b = render_toml(&compile_toml(&other)?.output)?;
    assert_ne!(fingerprint(&a), fingerprint(&b));
    Ok(())
}

#[test]
fn workflow_without_loops_adds_no_trigger_inputs() -> TestResult {
    let source = r#"
[workflow]
name = "plain"

[job.build]
steps = ["make"]

[job.test]
steps = ["make test"]
needs = ["build"]
"#;
    let compilation = compile_toml(source)?;
    assert!(compilation.diagnostics.is_empty());
    assert!(compilation.output.trigger.inputs.is_empty());
    assert!(compilation.output.concurrency.is_empty());
    assert_eq!(compilation.output.job_names(), vec!["build", "test"]);
    Ok(())
}

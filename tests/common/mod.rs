#![allow(dead_code)]

pub use loopdag_test_utils::{init_tracing, with_timeout};

use std::error::Error;

use loopdag::config::load_str;
use loopdag::lower::Compilation;

pub type TestResult = Result<(), Box<dyn Error>>;

/// Load, validate and lower workflow TOML held in memory.
pub fn compile_toml(source: &str) -> Result<Compilation, Box<dyn Error>> {
    let workflow = load_str(source)?;
    Ok(loopdag::compile(&workflow)?)
}

/// The `refine` loop used across tests: one body job, a cap of 5 and a
/// predicate, no explicit concurrency key.
pub const REFINE_WORKFLOW: &str = r#"
[workflow]
name = "ci"

[job.build]
steps = ["cargo build"]

[loop.refine]
max_iters = 5
until = "quality_score > 0.95"

[[loop.refine.body]]
name = "analyze"
steps = ["./analyze.sh"]
needs = ["build"]
"#;

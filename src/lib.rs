// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod diagnostics;
pub mod emit;
pub mod errors;
pub mod logging;
pub mod lower;
pub mod sim;
pub mod state;
pub mod types;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::WorkflowFile;
use crate::emit::{fingerprint, render_toml};
use crate::lower::{Compilation, PhaseSet, WorkflowAst, lower_workflow};
use crate::sim::{
    CoreSimulator, InvocationOutcome, InvocationRecord, ScriptedModel, SimEvent, SimOptions,
    SimRuntime,
};
use crate::state::{FileStateStore, MemoryStateStore, StateStore};

/// Lower a validated workflow file.
pub fn compile(workflow: &WorkflowFile) -> errors::Result<Compilation> {
    let ast = WorkflowAst::from(workflow);
    lower_workflow(&ast)
}

/// High-level entry point used by `main.rs`.
///
/// Loads and compiles the workflow, prints diagnostics to stderr, then
/// either emits the lowered workflow, prints a dry-run summary, or runs one
/// loop through the simulator.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let workflow = load_and_validate(&config_path)
        .with_context(|| format!("loading workflow file {:?}", config_path))?;

    let compilation = compile(&workflow)?;

    let file_name = config_path.display().to_string();
    for diagnostic in compilation.diagnostics.iter() {
        eprintln!(
            "{}",
            diagnostics::render(diagnostic, &file_name, workflow.source.as_deref())
        );
    }

    if compilation.has_errors() {
        bail!(
            "{} error(s) in {}; nothing emitted",
            compilation.errors().count(),
            file_name
        );
    }

    let rendered = render_toml(&compilation.output)?;
    let digest = fingerprint(&rendered);

    if args.dry_run {
        print_dry_run(&compilation, &digest);
        return Ok(());
    }

    if let Some(ref loop_name) = args.simulate {
        let Some(phase_set) = compilation.phase_set(loop_name) else {
            bail!("loop '{loop_name}' was not lowered; nothing to simulate");
        };
        let model = match args.satisfy_at {
            Some(n) => ScriptedModel::new().satisfy_at(n),
            None => ScriptedModel::new(),
        };
        let trace = match args.state_dir {
            Some(ref dir) => simulate(phase_set.clone(), FileStateStore::new(dir), model).await?,
            None => simulate(phase_set.clone(), MemoryStateStore::new(), model).await?,
        };
        print_trace(&trace);
        return Ok(());
    }

    match args.out {
        Some(ref out) => {
            fs::write(out, &rendered).with_context(|| format!("writing lowered workflow to {out}"))?;
            info!(path = %out, fingerprint = %digest, "wrote lowered workflow");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

/// Run one loop from its bootstrap invocation until it stops.
pub async fn simulate<S: StateStore + 'static>(
    phase_set: PhaseSet,
    store: S,
    model: ScriptedModel,
) -> Result<Vec<InvocationRecord>> {
    let core = CoreSimulator::new(phase_set, store, model, SimOptions::default());
    let bootstrap = core.bootstrap_inputs();

    let (tx, rx) = mpsc::channel::<SimEvent>(64);
    tx.send(SimEvent::InvocationRequested { inputs: bootstrap })
        .await
        .context("seeding simulation")?;

    let runtime = SimRuntime::new(core, tx, rx);
    let core = runtime.run().await?;
    Ok(core.trace().to_vec())
}

fn print_trace(trace: &[InvocationRecord]) {
    println!("simulation ({} invocations):", trace.len());
    for record in trace {
        let reason = record
            .decision
            .map(|d| d.reason.as_str())
            .unwrap_or("-");
        print!(
            "  {} iteration={} reason={} dispatched={}",
            record.invocation, record.inputs.iteration, reason, record.dispatched
        );
        match &record.outcome {
            InvocationOutcome::Completed => println!(),
            InvocationOutcome::Failed { job, reason } => println!(" FAILED in {job}: {reason}"),
        }
    }
}

/// Summary output: loops, their phase jobs and the bound keys.
fn print_dry_run(compilation: &Compilation, digest: &str) {
    let output = &compilation.output;
    println!("loopdag dry-run: workflow '{}'", output.name);
    println!("  jobs = {}", output.jobs.len());
    println!("  fingerprint = {digest}");
    println!();

    println!("loops ({}):", compilation.phase_sets.len());
    for phase_set in compilation.phase_sets.iter() {
        println!("  - {}", phase_set.construct);
        println!(
            "      concurrency: {} ({})",
            phase_set.concurrency.group, phase_set.concurrency.queue_policy
        );
        if let Some(cap) = phase_set.max_iters {
            println!("      max_iters: {cap}");
        }
        if let Some(ref until) = phase_set.until {
            println!("      until: {until}");
        }
        if phase_set.unbounded {
            println!("      unbounded: true");
        }
        for job in phase_set.jobs.iter() {
            if job.needs.is_empty() {
                println!("      {}", job.name);
            } else {
                println!("      {} <- {:?}", job.name, job.needs);
            }
        }
    }

    let warnings = compilation.warnings().count();
    if warnings > 0 {
        println!();
        println!("{warnings} warning(s)");
    }

    debug!("dry-run complete (nothing emitted)");
}

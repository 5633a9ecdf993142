// src/config/validate.rs

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::model::{ArtifactConfig, BodyMemberConfig, RawWorkflowFile, WorkflowFile};
use crate::errors::{LoopdagError, Result};
use crate::lower::phase::{body_job_name, decide_job_name, dispatch_job_name, hydrate_job_name};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("job name pattern is a valid regex")
});

impl TryFrom<RawWorkflowFile> for WorkflowFile {
    type Error = LoopdagError;

    fn try_from(raw: RawWorkflowFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_workflow(&raw)?;
        Ok(WorkflowFile::new_unchecked(raw.workflow, raw.job, raw.loops))
    }
}

/// Run every structural check on a raw workflow file.
///
/// Problems found here are fatal: they stop the file from being turned into
/// an AST at all. Safety checks on loops (termination, empty bodies,
/// nesting, keys) happen later and only produce diagnostics.
pub fn validate_raw_workflow(cfg: &RawWorkflowFile) -> Result<()> {
    ensure_has_work(cfg)?;
    validate_workflow_section(cfg)?;
    validate_names(cfg)?;
    validate_hard_caps(cfg)?;
    validate_scopes(cfg)?;
    Ok(())
}

fn config_err(msg: String) -> LoopdagError {
    LoopdagError::ConfigError(msg)
}

fn ensure_has_work(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.job.is_empty() && cfg.loops.is_empty() {
        return Err(config_err(
            "workflow must contain at least one [job.<name>] or [loop.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_workflow_section(cfg: &RawWorkflowFile) -> Result<()> {
    if cfg.workflow.name.trim().is_empty() {
        return Err(config_err("[workflow].name must not be empty".to_string()));
    }
    if cfg.workflow.invocation_id.trim().is_empty() {
        return Err(config_err(
            "[workflow].invocation_id must not be empty".to_string(),
        ));
    }
    if cfg.workflow.timeout_minutes == Some(0) {
        return Err(config_err(
            "[workflow].timeout_minutes must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn check_name(kind: &str, name: &str) -> Result<()> {
    if !NAME_RE.is_match(name) {
        return Err(config_err(format!(
            "{kind} name '{name}' is invalid (expected letters, digits, '_' or '-', not starting with a digit or '-')"
        )));
    }
    Ok(())
}

/// Names must be well-formed and unique across ordinary jobs, loops and all
/// body members, and must not collide with the names lowering generates.
/// Generated names must also be unique among themselves.
fn validate_names(cfg: &RawWorkflowFile) -> Result<()> {
    let mut seen: BTreeMap<&str, String> = BTreeMap::new();
    let mut synthesized: BTreeMap<String, &str> = BTreeMap::new();

    for name in cfg.job.keys() {
        check_name("job", name)?;
        seen.insert(name.as_str(), format!("job '{name}'"));
    }

    for (loop_name, spanned) in cfg.loops.iter() {
        check_name("loop", loop_name)?;
        if let Some(previous) = seen.insert(loop_name.as_str(), format!("loop '{loop_name}'")) {
            return Err(config_err(format!(
                "loop '{loop_name}' has the same name as {previous}"
            )));
        }

        let body = &spanned.get_ref().body;
        let generated = [
            hydrate_job_name(loop_name),
            decide_job_name(loop_name),
            dispatch_job_name(loop_name),
        ]
        .into_iter()
        .chain(body.iter().map(|m| body_job_name(loop_name, &m.name)));

        for job in generated {
            if let Some(other) = synthesized.insert(job.clone(), loop_name.as_str()) {
                return Err(config_err(format!(
                    "loops '{other}' and '{loop_name}' both generate a job named '{job}'; rename one of them"
                )));
            }
        }

        register_members(loop_name, body, &mut seen)?;
    }

    for (name, origin) in seen.iter() {
        if synthesized.contains_key(*name) {
            return Err(config_err(format!(
                "{origin} collides with a job generated for a loop; rename it"
            )));
        }
    }

    Ok(())
}

/// Record body member names, descending into nested loops.
fn register_members<'a>(
    loop_name: &str,
    members: &'a [BodyMemberConfig],
    seen: &mut BTreeMap<&'a str, String>,
) -> Result<()> {
    for member in members.iter() {
        check_name("body job", &member.name)?;
        let origin = format!("body job '{}' of loop '{loop_name}'", member.name);
        if let Some(previous) = seen.insert(member.name.as_str(), origin) {
            return Err(config_err(format!(
                "body job '{}' of loop '{loop_name}' has the same name as {previous}",
                member.name
            )));
        }
        if let Some(inner) = &member.body {
            register_members(loop_name, inner, seen)?;
        }
    }
    Ok(())
}

fn validate_hard_caps(cfg: &RawWorkflowFile) -> Result<()> {
    for (loop_name, spanned) in cfg.loops.iter() {
        let lp = spanned.get_ref();
        if lp.max_iters == Some(0) {
            return Err(config_err(format!(
                "loop '{loop_name}': max_iters must be >= 1 (got 0)"
            )));
        }
        if lp.timeout_minutes == Some(0) {
            return Err(config_err(format!(
                "loop '{loop_name}': timeout_minutes must be >= 1 (got 0)"
            )));
        }
        for member in lp.body.iter() {
            if member.max_iters == Some(0) {
                return Err(config_err(format!(
                    "loop '{loop_name}': body entry '{}' has max_iters = 0",
                    member.name
                )));
            }
        }
    }
    Ok(())
}

fn references<'a>(
    needs: &'a [String],
    consumes: &'a [ArtifactConfig],
) -> impl Iterator<Item = &'a str> {
    needs
        .iter()
        .map(String::as_str)
        .chain(consumes.iter().map(|c| c.job.as_str()))
}

/// Ordinary jobs live in the outer scope and may only reference each other.
/// Body jobs may reference ordinary jobs and their own siblings.
fn validate_scopes(cfg: &RawWorkflowFile) -> Result<()> {
    let mut owner: BTreeMap<&str, &str> = BTreeMap::new();
    for (loop_name, spanned) in cfg.loops.iter() {
        collect_owners(loop_name, &spanned.get_ref().body, &mut owner);
    }

    for (name, job) in cfg.job.iter() {
        for dep in references(&job.needs, &job.consumes) {
            if let Some(loop_name) = owner.get(dep) {
                return Err(config_err(format!(
                    "job '{name}' depends on '{dep}', which is scoped inside loop '{loop_name}'"
                )));
            }
            if cfg.loops.contains_key(dep) {
                return Err(config_err(format!(
                    "job '{name}' depends on loop '{dep}'; loops cannot be used as dependencies"
                )));
            }
        }
    }

    for (loop_name, spanned) in cfg.loops.iter() {
        for member in spanned.get_ref().body.iter() {
            for dep in references(&member.needs, &member.consumes) {
                match owner.get(dep) {
                    Some(other) if *other != loop_name.as_str() => {
                        return Err(config_err(format!(
                            "body job '{}' of loop '{loop_name}' depends on '{dep}', which belongs to loop '{other}'",
                            member.name
                        )));
                    }
                    _ => {}
                }
                if cfg.loops.contains_key(dep) {
                    return Err(config_err(format!(
                        "body job '{}' depends on loop '{dep}'; loops cannot be used as dependencies",
                        member.name
                    )));
                }
            }
        }
    }

    Ok(())
}

fn collect_owners<'a>(
    loop_name: &'a str,
    members: &'a [BodyMemberConfig],
    owner: &mut BTreeMap<&'a str, &'a str>,
) {
    for member in members.iter() {
        owner.insert(member.name.as_str(), loop_name);
        if let Some(inner) = &member.body {
            collect_owners(loop_name, inner, owner);
        }
    }
}

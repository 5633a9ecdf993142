// src/emit/mod.rs

//! Merged output document.
//!
//! Ordinary jobs come first in their input order, followed by each lowered
//! loop's jobs in lowering order. Nothing here depends on hash-map
//! iteration order, so the same input always renders to the same bytes.

use serde::Serialize;

use crate::errors::Result;
use crate::lower::job::JobDefinition;
use crate::lower::phase::{PhaseSet, TriggerInput};
use crate::types::QueuePolicy;

/// Trigger inputs the lowered workflow accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerDescriptor {
    pub inputs: Vec<TriggerInput>,
}

/// Mutual-exclusion block for one lowered loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcurrencyBlock {
    #[serde(rename = "loop")]
    pub loop_name: String,
    pub group: String,
    pub queue_policy: QueuePolicy,
    /// Jobs the group applies to.
    pub jobs: Vec<String>,
}

/// The merged job graph handed to the emitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoweredWorkflow {
    pub name: String,
    pub trigger: TriggerDescriptor,
    pub concurrency: Vec<ConcurrencyBlock>,
    pub jobs: Vec<JobDefinition>,
}

impl LoweredWorkflow {
    /// Merge untouched ordinary jobs with the lowered loops.
    pub fn merge(name: &str, ordinary: Vec<JobDefinition>, phase_sets: &[PhaseSet]) -> Self {
        let mut inputs = Vec::new();
        if !phase_sets.is_empty() {
            inputs.push(TriggerInput::loop_target());
        }

        let mut concurrency = Vec::with_capacity(phase_sets.len());
        let mut jobs = ordinary;

        for phase_set in phase_sets {
            inputs.extend(phase_set.trigger.inputs.iter().cloned());
            concurrency.push(ConcurrencyBlock {
                loop_name: phase_set.construct.clone(),
                group: phase_set.concurrency.group.clone(),
                queue_policy: phase_set.concurrency.queue_policy,
                jobs: phase_set.jobs.iter().map(|j| j.name.clone()).collect(),
            });
            jobs.extend(phase_set.jobs.iter().cloned());
        }

        Self {
            name: name.to_string(),
            trigger: TriggerDescriptor { inputs },
            concurrency,
            jobs,
        }
    }

    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }
}

/// Serialize the lowered workflow as TOML.
pub fn render_toml(workflow: &LoweredWorkflow) -> Result<String> {
    let rendered = toml::to_string_pretty(workflow)?;
    Ok(rendered)
}

/// blake3 hex digest of a rendered document.
pub fn fingerprint(rendered: &str) -> String {
    blake3::hash(rendered.as_bytes()).to_hex().to_string()
}

// src/lower/job.rs

//! Scheduler-neutral job definitions produced by lowering.
//!
//! Conditions (`if`) and value references use the target's expression
//! dialect (`inputs.x`, `needs.<job>.outputs.y`, `${{ ... }}`); the emitter
//! writes them out untouched.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::dag::node::JobNode;
use crate::types::{JobName, JobRole};

/// What a step does.
///
/// `Run` carries user commands; every other action is part of the
/// state-handoff protocol and is implemented by the scheduler-side runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Run {
        command: String,
    },
    DownloadArtifact {
        job: JobName,
        artifact: String,
    },
    /// Fetch the state blob stored under `(key, loop, invocation)`. A
    /// missing or corrupted blob fails the job.
    DownloadState {
        key: String,
        #[serde(rename = "loop")]
        loop_name: String,
        invocation: String,
    },
    /// Make the state fetched by `from_job` available to the user's steps.
    RestoreState {
        from_job: JobName,
    },
    /// Hand the state this job produced to `decide`.
    PublishState {
        job: JobName,
    },
    CollectState {
        jobs: Vec<JobName>,
    },
    EvaluateDecision {
        iteration: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_iters: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        until: Option<String>,
    },
    /// Loops sharing a concurrency key still write separate objects.
    PersistState {
        key: String,
        #[serde(rename = "loop")]
        loop_name: String,
        invocation: String,
    },
    /// Re-trigger the workflow with these inputs.
    Dispatch {
        inputs: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            id: None,
            condition: None,
            action,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// One job of the lowered workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDefinition {
    pub name: JobName,
    pub role: JobRole,
    /// Owning loop for synthesized jobs.
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_name: Option<String>,
    pub needs: Vec<JobName>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<u32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

impl JobDefinition {
    /// Pass an ordinary job through unchanged.
    ///
    /// Only the workflow-level default timeout is filled in when the job
    /// does not set one.
    pub fn ordinary(node: &JobNode, default_timeout: Option<u32>) -> Self {
        let mut steps: Vec<Step> = node
            .consumes
            .iter()
            .map(|c| {
                Step::new(StepAction::DownloadArtifact {
                    job: c.job.clone(),
                    artifact: c.artifact.clone(),
                })
            })
            .collect();
        steps.extend(node.steps.iter().map(|cmd| {
            Step::new(StepAction::Run {
                command: cmd.clone(),
            })
        }));

        Self {
            name: node.name.clone(),
            role: JobRole::Ordinary,
            loop_name: None,
            needs: node.dependencies().into_iter().map(str::to_string).collect(),
            condition: None,
            timeout_minutes: node.timeout_minutes.or(default_timeout),
            outputs: BTreeMap::new(),
            steps,
        }
    }
}

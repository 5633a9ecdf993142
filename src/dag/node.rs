// src/dag/node.rs

//! Job nodes: the vertices of the dependency graph.

use crate::config::model::{ArtifactConfig, BodyMemberConfig, JobConfig};
use crate::diagnostics::SourceSpan;
use crate::types::JobName;

/// Reference to an artifact produced by another job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    pub job: JobName,
    pub artifact: String,
}

impl From<&ArtifactConfig> for ArtifactRef {
    fn from(cfg: &ArtifactConfig) -> Self {
        Self {
            job: cfg.job.clone(),
            artifact: cfg.artifact.clone(),
        }
    }
}

/// One unit of work. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNode {
    pub name: JobName,
    /// Explicit `needs` edges, in declaration order.
    pub needs: Vec<JobName>,
    /// Artifact-consumption edges, in declaration order.
    pub consumes: Vec<ArtifactRef>,
    pub steps: Vec<String>,
    pub timeout_minutes: Option<u32>,
    pub span: Option<SourceSpan>,
}

impl JobNode {
    pub fn new(name: impl Into<JobName>) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            consumes: Vec::new(),
            steps: Vec::new(),
            timeout_minutes: None,
            span: None,
        }
    }

    pub fn needs(mut self, dep: impl Into<JobName>) -> Self {
        self.needs.push(dep.into());
        self
    }

    pub fn consumes(mut self, job: impl Into<JobName>, artifact: impl Into<String>) -> Self {
        self.consumes.push(ArtifactRef {
            job: job.into(),
            artifact: artifact.into(),
        });
        self
    }

    pub fn step(mut self, cmd: impl Into<String>) -> Self {
        self.steps.push(cmd.into());
        self
    }

    pub fn from_job_config(name: &str, cfg: &JobConfig) -> Self {
        Self {
            name: name.to_string(),
            needs: cfg.needs.clone(),
            consumes: cfg.consumes.iter().map(ArtifactRef::from).collect(),
            steps: cfg.steps.clone(),
            timeout_minutes: cfg.timeout_minutes,
            span: None,
        }
    }

    pub fn from_body_config(cfg: &BodyMemberConfig, span: Option<SourceSpan>) -> Self {
        Self {
            name: cfg.name.clone(),
            needs: cfg.needs.clone(),
            consumes: cfg.consumes.iter().map(ArtifactRef::from).collect(),
            steps: cfg.steps.clone(),
            timeout_minutes: cfg.timeout_minutes,
            span,
        }
    }

    /// All jobs this node depends on: `needs` first, then artifact
    /// producers, duplicates removed, first occurrence wins.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.needs.len() + self.consumes.len());
        let producers = self.consumes.iter().map(|c| c.job.as_str());
        for dep in self.needs.iter().map(String::as_str).chain(producers) {
            if !out.contains(&dep) {
                out.push(dep);
            }
        }
        out
    }
}

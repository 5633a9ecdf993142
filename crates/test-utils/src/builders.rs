#![allow(dead_code)]

use std::collections::BTreeMap;

use loopdag::config::{
    ArtifactConfig, BodyMemberConfig, JobConfig, LoopConfig, RawWorkflowFile, WorkflowFile,
    WorkflowSection,
};
use loopdag::errors::Result;
use toml::Spanned;

/// Builder for `WorkflowFile` to simplify test setup.
pub struct WorkflowFileBuilder {
    raw: RawWorkflowFile,
}

impl WorkflowFileBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            raw: RawWorkflowFile {
                workflow: WorkflowSection::new(name),
                job: BTreeMap::new(),
                loops: BTreeMap::new(),
            },
        }
    }

    pub fn invocation_id(mut self, expr: &str) -> Self {
        self.raw.workflow.invocation_id = expr.to_string();
        self
    }

    pub fn timeout_minutes(mut self, minutes: u32) -> Self {
        self.raw.workflow.timeout_minutes = Some(minutes);
        self
    }

    pub fn with_job(mut self, name: &str, job: JobConfig) -> Self {
        self.raw.job.insert(name.to_string(), job);
        self
    }

    pub fn with_loop(mut self, name: &str, construct: LoopConfig) -> Self {
        self.raw
            .loops
            .insert(name.to_string(), Spanned::new(0..0, construct));
        self
    }

    pub fn raw(self) -> RawWorkflowFile {
        self.raw
    }

    pub fn try_build(self) -> Result<WorkflowFile> {
        WorkflowFile::try_from(self.raw)
    }

    pub fn build(self) -> WorkflowFile {
        self.try_build()
            .expect("Failed to build valid workflow from builder")
    }
}

/// Builder for `JobConfig`.
#[derive(Default)]
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, cmd: &str) -> Self {
        self.job.steps.push(cmd.to_string());
        self
    }

    pub fn needs(mut self, dep: &str) -> Self {
        self.job.needs.push(dep.to_string());
        self
    }

    pub fn consumes(mut self, job: &str, artifact: &str) -> Self {
        self.job.consumes.push(ArtifactConfig {
            job: job.to_string(),
            artifact: artifact.to_string(),
        });
        self
    }

    pub fn timeout_minutes(mut self, minutes: u32) -> Self {
        self.job.timeout_minutes = Some(minutes);
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

/// Builder for `LoopConfig`.
#[derive(Default)]
pub struct LoopConfigBuilder {
    construct: LoopConfig,
}

impl LoopConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_iters(mut self, cap: u32) -> Self {
        self.construct.max_iters = Some(cap);
        self
    }

    pub fn until(mut self, predicate: &str) -> Self {
        self.construct.until = Some(predicate.to_string());
        self
    }

    pub fn concurrency(mut self, key: &str) -> Self {
        self.construct.concurrency = Some(key.to_string());
        self
    }

    pub fn timeout_minutes(mut self, minutes: u32) -> Self {
        self.construct.timeout_minutes = Some(minutes);
        self
    }

    /// Append a body job.
    pub fn body_job(mut self, name: &str, job: JobConfig) -> Self {
        self.construct.body.push(BodyMemberConfig {
            name: name.to_string(),
            steps: job.steps,
            needs: job.needs,
            consumes: job.consumes,
            timeout_minutes: job.timeout_minutes,
            ..BodyMemberConfig::default()
        });
        self
    }

    /// Append a nested loop as a body member.
    pub fn nested(mut self, name: &str, inner: LoopConfig) -> Self {
        self.construct.body.push(BodyMemberConfig {
            name: name.to_string(),
            max_iters: inner.max_iters,
            until: inner.until,
            concurrency: inner.concurrency,
            timeout_minutes: inner.timeout_minutes,
            body: Some(inner.body),
            ..BodyMemberConfig::default()
        });
        self
    }

    pub fn build(self) -> LoopConfig {
        self.construct
    }
}

/// Shorthand for a body or ordinary job that runs one command.
pub fn job(cmd: &str) -> JobConfigBuilder {
    JobConfigBuilder::new().step(cmd)
}

// src/lower/ast.rs

//! The validated input the lowering core consumes.

use std::num::NonZeroU32;

use crate::config::model::{BodyMemberConfig, LoopConfig, WorkflowFile};
use crate::dag::node::JobNode;
use crate::diagnostics::SourceSpan;

/// A user-declared cyclic unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationConstruct {
    pub name: String,
    /// Hard iteration cap.
    pub max_iters: Option<NonZeroU32>,
    /// Termination predicate text, forwarded verbatim.
    pub until: Option<String>,
    /// Explicit concurrency key, forwarded verbatim.
    pub concurrency: Option<String>,
    pub timeout_minutes: Option<u32>,
    pub body: Vec<BodyMember>,
    pub span: Option<SourceSpan>,
}

/// One entry of a construct's body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyMember {
    Job(JobNode),
    /// Always rejected during validation; kept so it can be reported.
    Nested(IterationConstruct),
}

impl BodyMember {
    pub fn name(&self) -> &str {
        match self {
            BodyMember::Job(job) => &job.name,
            BodyMember::Nested(construct) => &construct.name,
        }
    }
}

impl IterationConstruct {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_iters: None,
            until: None,
            concurrency: None,
            timeout_minutes: None,
            body: Vec::new(),
            span: None,
        }
    }

    pub fn max_iters(mut self, cap: u32) -> Self {
        self.max_iters = NonZeroU32::new(cap);
        self
    }

    pub fn until(mut self, predicate: impl Into<String>) -> Self {
        self.until = Some(predicate.into());
        self
    }

    pub fn concurrency(mut self, key: impl Into<String>) -> Self {
        self.concurrency = Some(key.into());
        self
    }

    pub fn job(mut self, job: JobNode) -> Self {
        self.body.push(BodyMember::Job(job));
        self
    }

    pub fn nested(mut self, inner: IterationConstruct) -> Self {
        self.body.push(BodyMember::Nested(inner));
        self
    }

    /// Body members that are plain jobs, in declaration order.
    pub fn body_jobs(&self) -> impl Iterator<Item = &JobNode> {
        self.body.iter().filter_map(|m| match m {
            BodyMember::Job(job) => Some(job),
            BodyMember::Nested(_) => None,
        })
    }

    pub fn nested_members(&self) -> impl Iterator<Item = &IterationConstruct> {
        self.body.iter().filter_map(|m| match m {
            BodyMember::Nested(inner) => Some(inner),
            BodyMember::Job(_) => None,
        })
    }

    pub fn from_config(name: &str, cfg: &LoopConfig, span: Option<SourceSpan>) -> Self {
        Self {
            name: name.to_string(),
            max_iters: cfg.max_iters.and_then(NonZeroU32::new),
            until: cfg.until.clone(),
            concurrency: cfg.concurrency.clone(),
            timeout_minutes: cfg.timeout_minutes,
            body: cfg
                .body
                .iter()
                .map(|m| body_member_from_config(m, span))
                .collect(),
            span,
        }
    }
}

fn body_member_from_config(cfg: &BodyMemberConfig, span: Option<SourceSpan>) -> BodyMember {
    match &cfg.body {
        Some(inner) => BodyMember::Nested(IterationConstruct {
            name: cfg.name.clone(),
            max_iters: cfg.max_iters.and_then(NonZeroU32::new),
            until: cfg.until.clone(),
            concurrency: cfg.concurrency.clone(),
            timeout_minutes: cfg.timeout_minutes,
            body: inner
                .iter()
                .map(|m| body_member_from_config(m, span))
                .collect(),
            span,
        }),
        None => BodyMember::Job(JobNode::from_body_config(cfg, span)),
    }
}

/// Whole-workflow input to [`crate::lower::lower_workflow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowAst {
    pub name: String,
    /// Scheduler expression yielding the current invocation id.
    pub invocation_id: String,
    pub timeout_minutes: Option<u32>,
    /// Jobs outside any iteration construct.
    pub jobs: Vec<JobNode>,
    pub constructs: Vec<IterationConstruct>,
}

impl WorkflowAst {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invocation_id: crate::config::model::default_invocation_id(),
            timeout_minutes: None,
            jobs: Vec::new(),
            constructs: Vec::new(),
        }
    }

    pub fn job(mut self, job: JobNode) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn construct(mut self, construct: IterationConstruct) -> Self {
        self.constructs.push(construct);
        self
    }
}

impl From<&WorkflowFile> for WorkflowAst {
    fn from(file: &WorkflowFile) -> Self {
        let jobs = file
            .job
            .iter()
            .map(|(name, cfg)| JobNode::from_job_config(name, cfg))
            .collect();

        let constructs = file
            .loops
            .iter()
            .map(|(name, spanned)| {
                let span = Some(SourceSpan::from(spanned.span()));
                IterationConstruct::from_config(name, spanned.get_ref(), span)
            })
            .collect();

        Self {
            name: file.workflow.name.clone(),
            invocation_id: file.workflow.invocation_id.clone(),
            timeout_minutes: file.workflow.timeout_minutes,
            jobs,
            constructs,
        }
    }
}

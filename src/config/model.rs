// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;
use toml::Spanned;

/// Top-level workflow file as read from TOML, before validation.
///
/// ```toml
/// [workflow]
/// name = "ci"
///
/// [job.build]
/// steps = ["cargo build"]
///
/// [loop.refine]
/// max_iters = 5
/// until = "quality_score > 0.95"
///
/// [[loop.refine.body]]
/// name = "analyze"
/// steps = ["./analyze.sh"]
/// needs = ["build"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkflowFile {
    /// Global settings from `[workflow]`.
    pub workflow: WorkflowSection,

    /// Ordinary jobs from `[job.<name>]`.
    #[serde(default)]
    pub job: BTreeMap<String, JobConfig>,

    /// Iteration constructs from `[loop.<name>]`.
    ///
    /// Spanned so diagnostics can point back at the loop's table.
    #[serde(default, rename = "loop")]
    pub loops: BTreeMap<String, Spanned<LoopConfig>>,
}

/// A workflow file that passed [`crate::config::validate`].
///
/// Only constructible through `TryFrom<RawWorkflowFile>` (or
/// [`WorkflowFile::new_unchecked`] inside the crate), so holding one means
/// names are well-formed, unique and correctly scoped.
#[derive(Debug, Clone)]
pub struct WorkflowFile {
    pub workflow: WorkflowSection,
    pub job: BTreeMap<String, JobConfig>,
    pub loops: BTreeMap<String, Spanned<LoopConfig>>,
    /// Original TOML text, when loaded from disk. Used to render spans.
    pub source: Option<String>,
}

impl WorkflowFile {
    pub(crate) fn new_unchecked(
        workflow: WorkflowSection,
        job: BTreeMap<String, JobConfig>,
        loops: BTreeMap<String, Spanned<LoopConfig>>,
    ) -> Self {
        Self {
            workflow,
            job,
            loops,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// `[workflow]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSection {
    /// Workflow identifier; part of every derived concurrency key.
    pub name: String,

    /// Scheduler expression that yields the current invocation's id.
    ///
    /// Used as the state store key for the blob `decide` persists.
    #[serde(default = "default_invocation_id")]
    pub invocation_id: String,

    /// Default timeout for every job that does not set its own.
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

pub fn default_invocation_id() -> String {
    "${{ github.run_id }}".to_string()
}

impl WorkflowSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invocation_id: default_invocation_id(),
            timeout_minutes: None,
        }
    }
}

/// `[job.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobConfig {
    /// Shell commands, run in order.
    #[serde(default)]
    pub steps: Vec<String>,

    /// Jobs that must finish before this one starts.
    #[serde(default)]
    pub needs: Vec<String>,

    /// Artifacts downloaded from other jobs; each implies a dependency.
    #[serde(default)]
    pub consumes: Vec<ArtifactConfig>,

    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

/// `{ job = "...", artifact = "..." }` entry of `consumes`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactConfig {
    pub job: String,
    pub artifact: String,
}

/// `[loop.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoopConfig {
    /// Hard iteration cap. Must be >= 1 when present.
    #[serde(default)]
    pub max_iters: Option<u32>,

    /// Termination predicate, forwarded verbatim to the scheduler runtime.
    #[serde(default)]
    pub until: Option<String>,

    /// Concurrency key. May contain scheduler runtime expressions.
    #[serde(default)]
    pub concurrency: Option<String>,

    /// Timeout applied to the synthesized jobs and to body jobs that do
    /// not set their own.
    #[serde(default)]
    pub timeout_minutes: Option<u32>,

    /// `[[loop.<name>.body]]` entries, in declaration order.
    #[serde(default)]
    pub body: Vec<BodyMemberConfig>,
}

/// One `[[loop.<name>.body]]` entry.
///
/// An entry with its own `body` key is a nested loop. Nested loops are
/// parsed so they can be reported, but they are never lowered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BodyMemberConfig {
    pub name: String,

    #[serde(default)]
    pub steps: Vec<String>,

    #[serde(default)]
    pub needs: Vec<String>,

    #[serde(default)]
    pub consumes: Vec<ArtifactConfig>,

    #[serde(default)]
    pub timeout_minutes: Option<u32>,

    #[serde(default)]
    pub max_iters: Option<u32>,

    #[serde(default)]
    pub until: Option<String>,

    #[serde(default)]
    pub concurrency: Option<String>,

    #[serde(default)]
    pub body: Option<Vec<BodyMemberConfig>>,
}

// src/config/mod.rs

//! Workflow file loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a workflow file from disk or a string (`loader.rs`).
//! - Validate names and scoping before lowering (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_str};
pub use model::{
    ArtifactConfig, BodyMemberConfig, JobConfig, LoopConfig, RawWorkflowFile, WorkflowFile,
    WorkflowSection,
};
pub use validate::validate_raw_workflow;

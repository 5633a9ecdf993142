// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{RawWorkflowFile, WorkflowFile};
use crate::errors::Result;

/// Parse workflow TOML without semantic validation.
pub fn parse_str(contents: &str) -> Result<RawWorkflowFile> {
    let raw: RawWorkflowFile = toml::from_str(contents)?;
    Ok(raw)
}

/// Load a workflow file from a given path and return the raw [`RawWorkflowFile`].
///
/// This only performs TOML deserialization; it does **not** check names or
/// scopes. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

/// Parse and validate workflow TOML held in memory.
///
/// The source text is kept on the result so diagnostics can be rendered
/// with line and column numbers.
pub fn load_str(contents: &str) -> Result<WorkflowFile> {
    let raw = parse_str(contents)?;
    let workflow = WorkflowFile::try_from(raw)?;
    Ok(workflow.with_source(contents))
}

/// Load a workflow file from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` default attributes).
/// - Checks name syntax, uniqueness, hard caps and job scoping.
///
/// Unknown job references are deliberately left to the graph builder, which
/// reports them while building the dependency graph.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    debug!(path = %path.display(), bytes = contents.len(), "loaded workflow file");
    load_str(&contents)
}

// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Fatal problems (bad workflow file, dangling job references, state that
//! cannot be hydrated) are [`LoopdagError`]s. Problems that should not stop
//! other constructs from being lowered are reported as
//! [`crate::diagnostics::Diagnostic`]s instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoopdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("job '{job}' references unknown job '{reference}'")]
    UnknownJobReference { job: String, reference: String },

    #[error("job '{0}' is declared more than once")]
    DuplicateJob(String),

    #[error("no iteration state stored for key '{key}' at invocation '{invocation}'")]
    StateNotFound { key: String, invocation: String },

    #[error("iteration state for key '{key}' at invocation '{invocation}' is corrupted: {reason}")]
    StateCorrupted {
        key: String,
        invocation: String,
        reason: String,
    },

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, LoopdagError>;

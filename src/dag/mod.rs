// src/dag/mod.rs

//! Dependency graph construction and cycle detection.
//!
//! - [`node`] holds the immutable job vertices.
//! - [`graph`] builds the job -> dependency graph and rejects dangling
//!   references.
//! - [`scc`] partitions the graph into strongly connected components.

pub mod graph;
pub mod node;
pub mod scc;

pub use graph::DependencyGraph;
pub use node::{ArtifactRef, JobNode};
pub use scc::{Scc, analyze};

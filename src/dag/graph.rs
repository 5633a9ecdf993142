// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::dag::node::JobNode;
use crate::errors::{LoopdagError, Result};

/// Directed graph of jobs.
///
/// Edge direction: job -> dependency. For
///
/// ```toml
/// [job.B]
/// needs = ["A"]
/// ```
///
/// we add edge B -> A.
///
/// Nodes keep their input order, which is what makes the cycle detector's
/// output deterministic.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<JobNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build a graph from job nodes.
    ///
    /// Fails with [`LoopdagError::UnknownJobReference`] if a `needs` or
    /// `consumes` entry names a job that is not in `jobs`, and with
    /// [`LoopdagError::DuplicateJob`] if two nodes share a name. No partial
    /// graph is returned.
    pub fn build(jobs: Vec<JobNode>) -> Result<Self> {
        let mut graph: DiGraph<JobNode, ()> = DiGraph::with_capacity(jobs.len(), 0);
        let mut index: HashMap<String, NodeIndex> = HashMap::with_capacity(jobs.len());

        for job in jobs {
            if index.contains_key(&job.name) {
                return Err(LoopdagError::DuplicateJob(job.name));
            }
            let name = job.name.clone();
            let idx = graph.add_node(job);
            index.insert(name, idx);
        }

        let mut edges: Vec<(NodeIndex, NodeIndex)> = Vec::new();
        for idx in graph.node_indices() {
            let job = &graph[idx];
            for dep in job.dependencies() {
                let Some(&dep_idx) = index.get(dep) else {
                    return Err(LoopdagError::UnknownJobReference {
                        job: job.name.clone(),
                        reference: dep.to_string(),
                    });
                };
                edges.push((idx, dep_idx));
            }
        }

        for (from, to) in edges {
            graph.add_edge(from, to, ());
        }

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built dependency graph"
        );

        Ok(Self { graph, index })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All job names, in input order.
    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|n| n.name.as_str())
    }

    pub fn node(&self, name: &str) -> Option<&JobNode> {
        self.index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Immediate dependencies of a job, in declaration order.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.node(name)
            .map(|n| n.dependencies())
            .unwrap_or_default()
    }

    /// Whether `name` lists itself as a dependency.
    pub fn has_self_edge(&self, name: &str) -> bool {
        self.index
            .get(name)
            .map(|&idx| self.graph.contains_edge(idx, idx))
            .unwrap_or(false)
    }

    /// Position of `name` in input order.
    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).map(|idx| idx.index())
    }

    /// Successor positions of the node at `pos`, in declaration order.
    pub(crate) fn successors(&self, pos: usize) -> Vec<usize> {
        let job = &self.graph[NodeIndex::new(pos)];
        job.dependencies()
            .into_iter()
            .filter_map(|dep| self.position(dep))
            .collect()
    }

    pub(crate) fn name_at(&self, pos: usize) -> &str {
        &self.graph[NodeIndex::new(pos)].name
    }
}

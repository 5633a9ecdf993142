// src/dag/scc.rs

//! Strongly connected components (Tarjan).
//!
//! The DFS is driven by an explicit call stack instead of recursion, so
//! long dependency chains cannot overflow the thread's stack.

use tracing::debug;

use crate::dag::graph::DependencyGraph;
use crate::types::JobName;

/// One strongly connected component of the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scc {
    /// Member job names, in graph input order.
    pub members: Vec<JobName>,
    /// More than one member, or a single member that depends on itself.
    pub is_cycle: bool,
}

impl Scc {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m == name)
    }
}

const UNVISITED: usize = usize::MAX;

/// Partition `graph` into strongly connected components.
///
/// Components come out in reverse topological order of the condensation:
/// since edges point at dependencies, every component appears after all the
/// components it depends on.
pub fn analyze(graph: &DependencyGraph) -> Vec<Scc> {
    let n = graph.len();
    let successors: Vec<Vec<usize>> = (0..n).map(|v| graph.successors(v)).collect();

    let mut index = vec![UNVISITED; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut components: Vec<Scc> = Vec::new();

    // (node, next successor to look at)
    let mut call: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }

        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        call.push((root, 0));

        while let Some(&(v, pos)) = call.last() {
            if let Some(&w) = successors[v].get(pos) {
                if let Some(top) = call.last_mut() {
                    top.1 += 1;
                }

                if index[w] == UNVISITED {
                    index[w] = next_index;
                    lowlink[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
                continue;
            }

            // All successors of v explored.
            call.pop();
            if let Some(&(parent, _)) = call.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }

            if lowlink[v] == index[v] {
                let mut members: Vec<usize> = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    members.push(w);
                    if w == v {
                        break;
                    }
                }
                members.sort_unstable();

                let is_cycle = members.len() > 1 || successors[v].contains(&v);
                components.push(Scc {
                    members: members
                        .into_iter()
                        .map(|m| graph.name_at(m).to_string())
                        .collect(),
                    is_cycle,
                });
            }
        }
    }

    debug!(
        components = components.len(),
        cycles = components.iter().filter(|c| c.is_cycle).count(),
        "cycle detection finished"
    );

    components
}

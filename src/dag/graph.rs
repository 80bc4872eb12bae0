// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::pipeline::DependencyEdge;
use crate::errors::{PipelineError, Result};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: tasks that must succeed before this one can run.
    deps: Vec<String>,
    /// Direct dependents: tasks that depend on this one.
    dependents: Vec<String>,
}

/// In-memory adjacency view over a pipeline's dependency edges, keyed by
/// task id.
///
/// The executor only ever asks two questions of it: "which tasks must succeed
/// before X" and "which tasks wait on X". Shape checks (acyclic, linear) are
/// done once when the pipeline is built.
#[derive(Debug, Clone)]
pub struct DagGraph {
    /// Task ids in declaration order.
    order: Vec<String>,
    nodes: HashMap<String, DagNode>,
}

impl DagGraph {
    /// Build a graph from task ids and edges.
    ///
    /// Edges that reference unknown ids are ignored here; callers validate
    /// references before building the graph.
    pub fn from_edges<'a, I>(task_ids: I, edges: &[DependencyEdge]) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut order = Vec::new();
        let mut nodes: HashMap<String, DagNode> = HashMap::new();

        for id in task_ids {
            if nodes.insert(id.to_string(), DagNode::default()).is_none() {
                order.push(id.to_string());
            }
        }

        for edge in edges {
            if !nodes.contains_key(&edge.upstream) || !nodes.contains_key(&edge.downstream) {
                continue;
            }
            if let Some(node) = nodes.get_mut(&edge.downstream) {
                node.deps.push(edge.upstream.clone());
            }
            if let Some(node) = nodes.get_mut(&edge.upstream) {
                node.dependents.push(edge.downstream.clone());
            }
        }

        Self { order, nodes }
    }

    /// Return all task ids in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Immediate dependencies of a task (its upstream tasks).
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a task (tasks that wait on it).
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Topological order of all tasks, or `DagCycle` if there is none.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        // Edge direction: upstream -> downstream.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for id in &self.order {
            graph.add_node(id.as_str());
        }
        for id in &self.order {
            for dep in self.dependencies_of(id) {
                graph.add_edge(dep.as_str(), id.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
            Err(cycle) => Err(PipelineError::DagCycle(format!(
                "cycle detected in pipeline involving task '{}'",
                cycle.node_id()
            ))),
        }
    }

    /// Check that the graph is a single chain: every task has at most one
    /// upstream and one downstream task, and exactly one task has none
    /// upstream.
    pub fn ensure_chain(&self) -> Result<()> {
        for id in &self.order {
            let deps = self.dependencies_of(id);
            if deps.len() > 1 {
                return Err(PipelineError::NotAChain(format!(
                    "task '{}' has {} upstream tasks ({}); expected at most one",
                    id,
                    deps.len(),
                    deps.join(", ")
                )));
            }
            let dependents = self.dependents_of(id);
            if dependents.len() > 1 {
                return Err(PipelineError::NotAChain(format!(
                    "task '{}' has {} downstream tasks ({}); expected at most one",
                    id,
                    dependents.len(),
                    dependents.join(", ")
                )));
            }
        }

        let roots: Vec<&str> = self
            .tasks()
            .filter(|id| self.dependencies_of(id).is_empty())
            .collect();
        if roots.len() > 1 {
            return Err(PipelineError::NotAChain(format!(
                "pipeline has {} independent starting tasks ({}); expected exactly one",
                roots.len(),
                roots.join(", ")
            )));
        }

        Ok(())
    }
}

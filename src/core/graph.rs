//! Task graph: the registry of named tasks and their relationships.
//!
//! Registration only checks name uniqueness, so prerequisites may name tasks
//! registered later. Edges are resolved when a target is validated, using
//! petgraph to reject unknown names and cycles before anything runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::task::Task;
use crate::error::{Error, Result};

/// Why one task must finish before another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Listed in the dependent task's prerequisites.
    Prerequisite,
    /// A step of the dependent task's sequence.
    SequenceStep,
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeKind::Prerequisite => write!(f, "prerequisite"),
            EdgeKind::SequenceStep => write!(f, "step"),
        }
    }
}

#[derive(Default)]
pub struct TaskGraph {
    tasks: BTreeMap<String, Arc<Task>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task.
    ///
    /// # Errors
    /// Returns `DuplicateTask` if a task with the same name exists.
    pub fn register(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.name) {
            return Err(Error::DuplicateTask(task.name));
        }
        self.tasks.insert(task.name.clone(), Arc::new(task));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Task>> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All tasks sorted by name.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.values()
    }

    /// Build the dependency graph of every task reachable from `target`.
    ///
    /// Edges point from the task that must finish first to the task that
    /// waits on it.
    pub fn dependency_graph(&self, target: &str) -> Result<DiGraph<String, EdgeKind>> {
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();
        let mut stack = vec![target.to_string()];
        let mut seen = HashSet::new();

        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let task = self
                .tasks
                .get(&name)
                .ok_or_else(|| Error::TaskNotFound(name.clone()))?;
            let to = node_for(&mut graph, &mut index, &name);

            for dep in task.referenced_tasks() {
                if !self.tasks.contains_key(dep) {
                    return Err(Error::TaskNotFound(format!("{} (required by {})", dep, name)));
                }
                let kind = if task.prerequisites.iter().any(|p| p == dep) {
                    EdgeKind::Prerequisite
                } else {
                    EdgeKind::SequenceStep
                };
                let from = node_for(&mut graph, &mut index, dep);
                graph.update_edge(from, to, kind);
                stack.push(dep.to_string());
            }
        }

        Ok(graph)
    }

    /// Check that `target` exists and that nothing reachable from it forms a
    /// cycle.
    pub fn validate(&self, target: &str) -> Result<()> {
        self.execution_order(target).map(|_| ())
    }

    /// Tasks reachable from `target` in an order where every task comes after
    /// everything it waits on.
    pub fn execution_order(&self, target: &str) -> Result<Vec<String>> {
        let graph = self.dependency_graph(target)?;
        let sorted = toposort(&graph, None).map_err(|cycle| {
            let name = graph
                .node_weight(cycle.node_id())
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            Error::Cycle(name)
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|idx| graph.node_weight(idx).cloned())
            .collect())
    }
}

fn node_for(
    graph: &mut DiGraph<String, EdgeKind>,
    index: &mut HashMap<String, NodeIndex>,
    name: &str,
) -> NodeIndex {
    if let Some(&idx) = index.get(name) {
        return idx;
    }
    let idx = graph.add_node(name.to_string());
    index.insert(name.to_string(), idx);
    idx
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

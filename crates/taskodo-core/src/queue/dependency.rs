//! Dependency graph for rejecting cyclic submissions.
//!
//! Design:
//! - Forward edges: task -> tasks it depends on (waits for)
//! - Reverse edges: task -> tasks that depend on it (waiting tasks)
//! - Invariant: edges and reverse_edges must be kept in sync
//! - Invariant: the graph is acyclic; `submit` checks every new node before
//!   keeping it, so any new cycle must pass through that node.
//!
//! Nodes may name tasks that are not (or no longer) registered: a dependency
//! on a future id is legal. A task that reaches a terminal status drops its
//! forward edges, so a reused id only sees edges of tasks still waiting.

use std::collections::{HashMap, HashSet};

use crate::domain::TaskId;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward edges: task -> tasks it depends on (waits for)
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// Reverse edges: task -> tasks that depend on it (waiting tasks)
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task` waits for every id in `depends_on`.
    pub fn add_task<'a>(&mut self, task: &TaskId, depends_on: impl IntoIterator<Item = &'a TaskId>) {
        for dep in depends_on {
            self.edges
                .entry(task.clone())
                .or_default()
                .insert(dep.clone());
            self.reverse_edges
                .entry(dep.clone())
                .or_default()
                .insert(task.clone());
        }
    }

    /// Drop the forward edges of `task`. Edges of tasks still waiting for it
    /// stay: they keep declaring the dependency.
    pub fn remove_task(&mut self, task: &TaskId) {
        let Some(deps) = self.edges.remove(task) else {
            return;
        };
        for dep in deps {
            if let Some(waiting) = self.reverse_edges.get_mut(&dep) {
                waiting.remove(task);
                if waiting.is_empty() {
                    self.reverse_edges.remove(&dep);
                }
            }
        }
    }

    /// Tasks that declared a dependency on `task`.
    pub fn dependents(&self, task: &TaskId) -> Vec<TaskId> {
        let mut waiting: Vec<TaskId> = self
            .reverse_edges
            .get(task)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default();
        waiting.sort();
        waiting
    }

    pub fn has_dependencies(&self, task: &TaskId) -> bool {
        self.edges.get(task).is_some_and(|deps| !deps.is_empty())
    }

    /// Find a cycle that returns to `start`, following forward edges.
    ///
    /// Returns the path `start -> ... -> start`, or None.
    pub fn cycle_through(&self, start: &TaskId) -> Option<Vec<TaskId>> {
        let mut visited: HashSet<&TaskId> = HashSet::new();
        let mut prev: HashMap<&TaskId, &TaskId> = HashMap::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            for dep in self.edges.get(node).into_iter().flatten() {
                if dep == start {
                    return Some(Self::follow_path(start, node, &prev));
                }
                if visited.insert(dep) {
                    prev.insert(dep, node);
                    stack.push(dep);
                }
            }
        }
        None
    }

    fn follow_path(start: &TaskId, last: &TaskId, prev: &HashMap<&TaskId, &TaskId>) -> Vec<TaskId> {
        let mut path = vec![start.clone(), last.clone()];
        let mut current = last;
        while current != start {
            match prev.get(current) {
                Some(&p) => {
                    path.push(p.clone());
                    current = p;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }
}

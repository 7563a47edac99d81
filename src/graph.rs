//! FlowGraph - DAG structure over registered task ids
//!
//! Performance notes (same layout as the rest of the crate):
//! - Arc<str> for zero-cost cloning of task ids
//! - FxHashMap for faster non-crypto hashing
//! - SmallVec for stack-allocated small dependency lists (0-4 items)
//!
//! Validation:
//! - Cycle detection using DFS three-color marking (reports the cycle path)
//! - Canonical topological order via Kahn's algorithm, ties broken by task
//!   declaration order so execution order is reproducible across runs

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::{Result, WeirError};

/// Stack-allocated deps: most tasks have 0-4 dependencies
pub type DepVec = SmallVec<[Arc<str>; 4]>;

/// Graph of task dependencies (edges point source → target)
pub struct FlowGraph {
    /// task_id -> successor task_ids
    adjacency: FxHashMap<Arc<str>, DepVec>,
    /// task_id -> predecessor task_ids (dependencies)
    predecessors: FxHashMap<Arc<str>, DepVec>,
    /// All task ids in declaration order
    task_ids: Vec<Arc<str>>,
}

impl FlowGraph {
    /// Build from task ids (declaration order) and deduplicated edges.
    /// Both endpoints of every edge must be registered task ids.
    pub fn new(task_ids: Vec<Arc<str>>, edges: &[(Arc<str>, Arc<str>)]) -> Self {
        let capacity = task_ids.len();
        let mut adjacency: FxHashMap<Arc<str>, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut predecessors: FxHashMap<Arc<str>, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());

        for id in &task_ids {
            adjacency.insert(Arc::clone(id), DepVec::new());
            predecessors.insert(Arc::clone(id), DepVec::new());
        }

        for (source, target) in edges {
            adjacency
                .entry(Arc::clone(source))
                .or_default()
                .push(Arc::clone(target));
            predecessors
                .entry(Arc::clone(target))
                .or_default()
                .push(Arc::clone(source));
        }

        Self {
            adjacency,
            predecessors,
            task_ids,
        }
    }

    /// Dependencies of a task (upstream ids)
    #[inline]
    pub fn dependencies(&self, task_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors
            .get(task_id)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Successors of a task (downstream ids)
    #[inline]
    pub fn successors(&self, task_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.adjacency
            .get(task_id)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Tasks with no successors (final tasks)
    pub fn final_tasks(&self) -> Vec<Arc<str>> {
        self.task_ids
            .iter()
            .filter(|id| {
                self.adjacency
                    .get(id.as_ref())
                    .is_none_or(SmallVec::is_empty)
            })
            .cloned()
            .collect()
    }

    #[inline]
    pub fn contains(&self, task_id: &str) -> bool {
        self.adjacency.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.task_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_ids.is_empty()
    }

    /// Check if there's a path from `from` to `to` (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = self.adjacency.get(current) {
                for neighbor in neighbors {
                    if neighbor.as_ref() == to {
                        return true;
                    }
                    if visited.insert(neighbor.as_ref()) {
                        queue.push_back(neighbor.as_ref());
                    }
                }
            }
        }

        false
    }

    /// Detect cycles using DFS with three-color marking.
    ///
    /// - White: unvisited
    /// - Gray: currently in the DFS stack
    /// - Black: fully processed
    ///
    /// A cycle exists when traversal reaches a Gray node; the error carries
    /// the cycle path.
    pub fn detect_cycles(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: FxHashMap<Arc<str>, Color> = self
            .task_ids
            .iter()
            .map(|id| (Arc::clone(id), Color::White))
            .collect();
        let mut stack: Vec<Arc<str>> = Vec::new();

        fn dfs(
            node: Arc<str>,
            adjacency: &FxHashMap<Arc<str>, DepVec>,
            colors: &mut FxHashMap<Arc<str>, Color>,
            stack: &mut Vec<Arc<str>>,
        ) -> std::result::Result<(), String> {
            colors.insert(Arc::clone(&node), Color::Gray);
            stack.push(Arc::clone(&node));

            if let Some(neighbors) = adjacency.get(&node) {
                for neighbor in neighbors {
                    match colors.get(neighbor) {
                        Some(Color::Gray) => {
                            // Gray neighbor is on the current DFS path
                            let cycle_start = stack
                                .iter()
                                .position(|x| x.as_ref() == neighbor.as_ref())
                                .unwrap_or(0);
                            let cycle: Vec<&str> =
                                stack[cycle_start..].iter().map(|s| s.as_ref()).collect();
                            return Err(format!("{} → {}", cycle.join(" → "), neighbor));
                        }
                        Some(Color::White) | None => {
                            dfs(Arc::clone(neighbor), adjacency, colors, stack)?;
                        }
                        Some(Color::Black) => {}
                    }
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        for task_id in &self.task_ids {
            if colors.get(task_id) == Some(&Color::White) {
                if let Err(cycle) = dfs(
                    Arc::clone(task_id),
                    &self.adjacency,
                    &mut colors,
                    &mut stack,
                ) {
                    return Err(WeirError::CycleDetected { cycle });
                }
            }
        }

        Ok(())
    }

    /// Canonical topological order: Kahn's algorithm with the ready set
    /// keyed by declaration index, so ties always resolve the same way.
    pub fn topological_order(&self) -> Result<Vec<Arc<str>>> {
        let index_of: FxHashMap<&str, usize> = self
            .task_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_ref(), i))
            .collect();

        let mut in_degree: Vec<usize> = self
            .task_ids
            .iter()
            .map(|id| self.dependencies(id).len())
            .collect();

        // Ordered ready set of declaration indices
        let mut ready: std::collections::BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order: Vec<Arc<str>> = Vec::with_capacity(self.task_ids.len());

        while let Some(idx) = ready.pop_first() {
            let id = &self.task_ids[idx];
            order.push(Arc::clone(id));

            for successor in self.successors(id) {
                let succ_idx = index_of[successor.as_ref()];
                in_degree[succ_idx] -= 1;
                if in_degree[succ_idx] == 0 {
                    ready.insert(succ_idx);
                }
            }
        }

        if order.len() != self.task_ids.len() {
            // detect_cycles produces the path; this is the structural backstop
            return Err(WeirError::CycleDetected {
                cycle: "(unresolved tasks remain after Kahn's algorithm)".to_string(),
            });
        }

        Ok(order)
    }
}

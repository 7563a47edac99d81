//! Flow construction - builder in, immutable DAG out
//!
//! A `FlowBuilder` registers tasks (returning typed handles) and explicit
//! ordering edges. `build()` infers implicit edges from input bindings,
//! deduplicates, validates the graph (unknown references, cycles), and
//! computes the canonical topological order once, so execution order is
//! reproducible for identical declarations.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::error::{Result, WeirError};
use crate::graph::FlowGraph;
use crate::task::{validate_task_id, Input, Task, TaskDef, TaskHandle};

// ============================================================================
// EDGES
// ============================================================================

/// How an edge entered the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeOrigin {
    /// Inferred from an input binding referencing another task's output
    Implicit,
    /// Declared directly by the flow author (no data payload)
    Explicit,
}

/// Ordered dependency pair: source must reach terminal success before
/// target becomes eligible
#[derive(Debug, Clone)]
pub struct Edge {
    pub source: Arc<str>,
    pub target: Arc<str>,
    pub origin: EdgeOrigin,
}

// ============================================================================
// FLOW
// ============================================================================

/// A named, immutable DAG of tasks plus its canonical topological order
pub struct Flow {
    name: Arc<str>,
    tasks: Vec<Arc<Task>>,
    by_id: FxHashMap<Arc<str>, Arc<Task>>,
    edges: Vec<Edge>,
    graph: FlowGraph,
    topo_order: Vec<Arc<str>>,
}

impl Flow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Tasks in declaration order
    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Arc<Task>> {
        self.by_id.get(id)
    }

    /// Deduplicated edges (implicit first, then explicit, declaration order)
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Canonical topological order computed at build time
    pub fn topological_order(&self) -> &[Arc<str>] {
        &self.topo_order
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("tasks", &self.tasks.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

// ============================================================================
// FLOW BUILDER
// ============================================================================

/// Fluent builder for constructing flows programmatically.
///
/// There is no ambient "current flow": every task registration names its
/// builder explicitly and returns a typed handle for wiring.
pub struct FlowBuilder {
    name: String,
    tasks: Vec<Arc<Task>>,
    ids: FxHashSet<Arc<str>>,
    explicit_edges: Vec<(String, String)>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            ids: FxHashSet::default(),
            explicit_edges: Vec::new(),
        }
    }

    /// Register a task. Id validity and uniqueness are checked immediately;
    /// references held by inputs and edges are checked at `build()`.
    pub fn add_task(&mut self, def: TaskDef) -> Result<TaskHandle> {
        validate_task_id(&def.id)?;

        let id: Arc<str> = Arc::from(def.id.as_str());
        if !self.ids.insert(Arc::clone(&id)) {
            return Err(WeirError::DuplicateTask { id: def.id });
        }

        self.tasks.push(Arc::new(Task {
            id: Arc::clone(&id),
            kind: def.kind,
            inputs: def.inputs,
            retry: def.retry,
        }));

        Ok(TaskHandle { id })
    }

    /// Declare an explicit ordering edge (source → target) with no data
    /// payload. The canonical way to sequence external-job tasks, whose
    /// only output is an opaque handle.
    pub fn edge(&mut self, source: &str, target: &str) -> &mut Self {
        self.explicit_edges
            .push((source.to_string(), target.to_string()));
        self
    }

    /// Handle-based form of [`edge`](Self::edge)
    pub fn edge_between(&mut self, source: &TaskHandle, target: &TaskHandle) -> &mut Self {
        self.edge(source.id(), target.id())
    }

    /// Validate and freeze the flow.
    ///
    /// Implicit edges are inferred first (producer → consumer for every
    /// task-output input), explicit edges appended, duplicates dropped.
    /// Fails with `UnknownTask` for dangling references and `CycleDetected`
    /// for cyclic graphs; no partial flow is ever produced.
    pub fn build(self) -> Result<Flow> {
        if self.tasks.is_empty() {
            return Err(WeirError::EmptyFlow { flow: self.name });
        }

        let mut seen: FxHashSet<(Arc<str>, Arc<str>)> = FxHashSet::default();
        let mut edges: Vec<Edge> = Vec::new();

        // Implicit edges from input bindings
        for task in &self.tasks {
            for input in &task.inputs {
                if let Input::TaskOutput(source) = input {
                    let source = self.resolve_id(source, &task.id)?;
                    let pair = (Arc::clone(&source), Arc::clone(&task.id));
                    if seen.insert(pair) {
                        edges.push(Edge {
                            source,
                            target: Arc::clone(&task.id),
                            origin: EdgeOrigin::Implicit,
                        });
                    }
                }
            }
        }

        // Explicit edges, deduplicated against implicit ones
        for (source, target) in &self.explicit_edges {
            let source = self.lookup_id(source, "explicit edge")?;
            let target = self.lookup_id(target, "explicit edge")?;
            let pair = (Arc::clone(&source), Arc::clone(&target));
            if seen.insert(pair) {
                edges.push(Edge {
                    source,
                    target,
                    origin: EdgeOrigin::Explicit,
                });
            }
        }

        let task_ids: Vec<Arc<str>> = self.tasks.iter().map(|t| Arc::clone(&t.id)).collect();
        let edge_pairs: Vec<(Arc<str>, Arc<str>)> = edges
            .iter()
            .map(|e| (Arc::clone(&e.source), Arc::clone(&e.target)))
            .collect();

        let graph = FlowGraph::new(task_ids, &edge_pairs);
        graph.detect_cycles()?;
        let topo_order = graph.topological_order()?;

        let by_id: FxHashMap<Arc<str>, Arc<Task>> = self
            .tasks
            .iter()
            .map(|t| (Arc::clone(&t.id), Arc::clone(t)))
            .collect();

        Ok(Flow {
            name: Arc::from(self.name.as_str()),
            tasks: self.tasks,
            by_id,
            edges,
            graph,
            topo_order,
        })
    }

    /// Resolve an input-binding reference to the registered Arc
    fn resolve_id(&self, id: &Arc<str>, referenced_by: &Arc<str>) -> Result<Arc<str>> {
        self.ids.get(id.as_ref()).cloned().ok_or_else(|| {
            WeirError::UnknownTask {
                id: id.to_string(),
                referenced_by: format!("input binding of task '{referenced_by}'"),
            }
        })
    }

    /// Resolve an explicit-edge endpoint to the registered Arc
    fn lookup_id(&self, id: &str, referenced_by: &str) -> Result<Arc<str>> {
        self.ids.get(id).cloned().ok_or_else(|| WeirError::UnknownTask {
            id: id.to_string(),
            referenced_by: referenced_by.to_string(),
        })
    }
}

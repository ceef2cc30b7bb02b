//! Job dependency graph.
//!
//! Jobs are nodes; an edge `base -> target` means `base` runs after
//! `target` in the sense given by its [`DependencyKind`]. `Before*` kinds are
//! normalized away on insertion, so every stored edge points from a job to
//! a job it depends on.

use crate::core::job::{Job, JobId};
use crate::error::{Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Batch-scheduler dependency kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Start after the target has started.
    After,
    /// Start after the target has finished, whatever its exit status.
    AfterAny,
    /// Start after the target has finished successfully.
    AfterOk,
    /// Start after the target has failed.
    AfterNotOk,
    Before,
    BeforeAny,
    BeforeOk,
    BeforeNotOk,
}

impl Default for DependencyKind {
    fn default() -> Self {
        Self::AfterAny
    }
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::After => "after",
            DependencyKind::AfterAny => "afterany",
            DependencyKind::AfterOk => "afterok",
            DependencyKind::AfterNotOk => "afternotok",
            DependencyKind::Before => "before",
            DependencyKind::BeforeAny => "beforeany",
            DependencyKind::BeforeOk => "beforeok",
            DependencyKind::BeforeNotOk => "beforenotok",
        }
    }

    pub fn is_before(&self) -> bool {
        matches!(
            self,
            DependencyKind::Before
                | DependencyKind::BeforeAny
                | DependencyKind::BeforeOk
                | DependencyKind::BeforeNotOk
        )
    }

    /// The `After*` counterpart of a `Before*` kind; `After*` kinds map to
    /// themselves.
    pub fn to_after(self) -> Self {
        match self {
            DependencyKind::Before => DependencyKind::After,
            DependencyKind::BeforeAny => DependencyKind::AfterAny,
            DependencyKind::BeforeOk => DependencyKind::AfterOk,
            DependencyKind::BeforeNotOk => DependencyKind::AfterNotOk,
            other => other,
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DependencyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s.to_lowercase().as_str() {
            "after" => DependencyKind::After,
            "afterany" => DependencyKind::AfterAny,
            "afterok" => DependencyKind::AfterOk,
            "afternotok" => DependencyKind::AfterNotOk,
            "before" => DependencyKind::Before,
            "beforeany" => DependencyKind::BeforeAny,
            "beforeok" => DependencyKind::BeforeOk,
            "beforenotok" => DependencyKind::BeforeNotOk,
            other => {
                return Err(Error::Validation(format!(
                    "unsupported dependency kind: {}",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

/// A normalized edge: `base` depends on `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub base: JobId,
    pub target: JobId,
    pub kind: DependencyKind,
}

impl Dependency {
    /// Build an edge, swapping `base` and `target` for `Before*` kinds.
    pub fn normalized(base: JobId, target: JobId, kind: DependencyKind) -> Self {
        if kind.is_before() {
            Self {
                base: target,
                target: base,
                kind: kind.to_after(),
            }
        } else {
            Self { base, target, kind }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

struct Frame {
    node: NodeIndex,
    targets: Vec<NodeIndex>,
    next: usize,
}

/// Adjacency-list graph of jobs keyed by [`JobId`].
pub struct JobGraph {
    graph: DiGraph<Job, DependencyKind>,
    index: HashMap<JobId, NodeIndex>,
}

impl JobGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Register a job with no dependencies.
    ///
    /// # Errors
    /// `DuplicateJob` if a job with the same id is already registered.
    pub fn add_job(&mut self, job: Job) -> Result<JobId> {
        if self.index.contains_key(&job.id) {
            return Err(Error::DuplicateJob(job.id));
        }
        let id = job.id;
        let node = self.graph.add_node(job);
        self.index.insert(id, node);
        Ok(id)
    }

    /// Declare that `base` relates to `target` by `kind`.
    ///
    /// `Before*` kinds are flipped into the equivalent `After*` edge with
    /// the endpoints swapped. An existing edge between the same pair is
    /// replaced, so repeating a call is a no-op.
    pub fn set_dependency(
        &mut self,
        base: &JobId,
        target: &JobId,
        kind: DependencyKind,
    ) -> Result<()> {
        let dep = Dependency::normalized(*base, *target, kind);
        let base_idx = self.node(&dep.base)?;
        let target_idx = self.node(&dep.target)?;

        if let Some(edge) = self.graph.find_edge(base_idx, target_idx) {
            self.graph.remove_edge(edge);
        }
        self.graph.add_edge(base_idx, target_idx, dep.kind);
        Ok(())
    }

    fn node(&self, id: &JobId) -> Result<NodeIndex> {
        self.index.get(id).copied().ok_or(Error::JobNotFound(*id))
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    pub fn get_mut(&mut self, id: &JobId) -> Option<&mut Job> {
        match self.index.get(id) {
            Some(&index) => self.graph.node_weight_mut(index),
            None => None,
        }
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.index.contains_key(id)
    }

    pub fn job_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Jobs in registration order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.graph.node_weights()
    }

    pub fn has_dependency(&self, base: &JobId, target: &JobId) -> bool {
        self.dependency_kind(base, target).is_some()
    }

    pub fn dependency_kind(&self, base: &JobId, target: &JobId) -> Option<DependencyKind> {
        let b = self.index.get(base)?;
        let t = self.index.get(target)?;
        let edge = self.graph.find_edge(*b, *t)?;
        self.graph.edge_weight(edge).copied()
    }

    /// Outgoing edges of `id`: the jobs it depends on.
    pub fn dependencies(&self, id: &JobId) -> Vec<Dependency> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<Dependency> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| Dependency {
                base: self.graph[edge.source()].id,
                target: self.graph[edge.target()].id,
                kind: *edge.weight(),
            })
            .collect();
        // petgraph walks newest-first
        deps.reverse();
        deps
    }

    /// Jobs that depend on `id`.
    pub fn dependents(&self, id: &JobId) -> Vec<&Job> {
        match self.index.get(id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|n| self.graph.node_weight(n))
                .collect(),
            None => Vec::new(),
        }
    }

    fn targets(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut targets: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        targets.reverse();
        targets
    }

    /// Linearize the graph so that every job follows all jobs it depends on.
    ///
    /// Depth-first search over every registered job with white/grey/black
    /// marks. A job is emitted only once all of its dependency edges are
    /// fully explored; reaching a grey job means the current path loops back
    /// on itself.
    ///
    /// # Errors
    /// `CycleDetected`, naming the job where the cycle closed.
    pub fn topo_sort(&self) -> Result<Vec<JobId>> {
        let mut marks = vec![Mark::White; self.graph.node_count()];
        let mut order = Vec::with_capacity(self.graph.node_count());

        for root in self.graph.node_indices() {
            if marks[root.index()] != Mark::White {
                continue;
            }
            marks[root.index()] = Mark::Grey;
            let mut stack = vec![Frame {
                node: root,
                targets: self.targets(root),
                next: 0,
            }];

            while let Some(frame) = stack.last_mut() {
                let node = frame.node;
                let step = frame.targets.get(frame.next).copied();
                frame.next += 1;

                match step {
                    Some(target) => match marks[target.index()] {
                        Mark::Grey => {
                            return Err(Error::CycleDetected {
                                job: self.graph[target].name.clone(),
                            })
                        }
                        Mark::Black => {}
                        Mark::White => {
                            marks[target.index()] = Mark::Grey;
                            stack.push(Frame {
                                node: target,
                                targets: self.targets(target),
                                next: 0,
                            });
                        }
                    },
                    None => {
                        marks[node.index()] = Mark::Black;
                        order.push(self.graph[node].id);
                        stack.pop();
                    }
                }
            }
        }

        Ok(order)
    }

    pub fn is_acyclic(&self) -> bool {
        self.topo_sort().is_ok()
    }
}

impl Default for JobGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JobGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobGraph")
            .field("jobs", &self.job_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

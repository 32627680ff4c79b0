//! Evaluation order for a pattern graph.
//!
//! Roots are picked by estimated size among nodes that can be looked up on
//! their own (a class or a record id) and whose dependencies are bound.
//! From each root the graph is walked depth first, scheduling every edge
//! that can be evaluated from the bound side. Plain `out`/`in`/`both` hops
//! may be walked backwards; recursive hops and hops into optional nodes are
//! only taken in their declared direction. An edge whose two ends are
//! already bound becomes a join check.

use crate::query::errors::PlanningError;
use crate::query::metadata::MetadataProvider;
use crate::query::pattern::graph::PatternGraph;
use crate::types::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ScheduleStep {
    /// Enumerate candidates for a root node.
    Start { node: usize, estimate: u64 },
    /// Follow an edge from its bound end; `forward` is the declared direction.
    Traverse { edge: usize, forward: bool },
}

impl ScheduleStep {
    pub fn describe(&self, graph: &PatternGraph) -> String {
        match *self {
            ScheduleStep::Start { node, estimate } => {
                let node = &graph.nodes[node];
                let source = match (&node.constraint.rid, &node.constraint.class) {
                    (Some(rid), _) => rid.to_string(),
                    (None, Some(class)) => class.clone(),
                    (None, None) => "?".to_owned(),
                };
                format!("{{{}}} from {source} (~{estimate})", node.alias)
            }
            ScheduleStep::Traverse { edge, forward } => {
                let edge = &graph.edges[edge];
                let (from, to) = if forward {
                    (edge.from, edge.to)
                } else {
                    (edge.to, edge.from)
                };
                format!(
                    "{{{}}}.{}{{{}}}",
                    graph.nodes[from].alias,
                    edge.hop.describe(forward),
                    graph.nodes[to].alias
                )
            }
        }
    }
}

/// Outcome of scheduling.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Schedule {
    Steps(Vec<ScheduleStep>),
    /// A mandatory node's class holds no records; nothing can match.
    Empty { alias: String },
}

struct Scheduler<'g> {
    graph: &'g PatternGraph,
    estimates: Vec<Option<u64>>,
    visited: Vec<bool>,
    done: Vec<bool>,
    steps: Vec<ScheduleStep>,
}

impl Scheduler<'_> {
    fn deps_ready(&self, node: usize) -> bool {
        self.graph.nodes[node].deps.iter().all(|dep| self.visited[*dep])
    }

    /// Direction in which an edge can be evaluated now, if any.
    fn direction(&self, edge_idx: usize) -> Option<bool> {
        if self.done[edge_idx] {
            return None;
        }
        let edge = &self.graph.edges[edge_idx];
        if self.visited[edge.from] && (self.visited[edge.to] || self.deps_ready(edge.to)) {
            return Some(true);
        }
        let reversible = edge.hop.method.is_some_and(|method| method.is_reversible())
            && !edge.hop.is_recursive()
            && edge.depth_alias.is_none()
            && edge.path_alias.is_none();
        let backwards = self.visited[edge.to]
            && !self.visited[edge.from]
            && reversible
            && !self.graph.nodes[edge.from].optional
            && self.deps_ready(edge.from);
        backwards.then_some(false)
    }

    /// Schedules an edge; returns the node it newly binds.
    fn take_edge(&mut self, edge_idx: usize, forward: bool) -> Option<usize> {
        self.done[edge_idx] = true;
        self.steps.push(ScheduleStep::Traverse {
            edge: edge_idx,
            forward,
        });
        let edge = &self.graph.edges[edge_idx];
        let target = if forward { edge.to } else { edge.from };
        if self.visited[target] {
            return None;
        }
        self.visited[target] = true;
        Some(target)
    }

    fn expand(&mut self, start: usize) {
        let mut stack = vec![start];
        while let Some(&node) = stack.last() {
            let next = (0..self.graph.edges.len()).find_map(|edge_idx| {
                let edge = &self.graph.edges[edge_idx];
                if edge.from != node && edge.to != node {
                    return None;
                }
                self.direction(edge_idx).map(|forward| (edge_idx, forward))
            });
            match next {
                Some((edge_idx, forward)) => {
                    if let Some(bound) = self.take_edge(edge_idx, forward) {
                        stack.push(bound);
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }
    }

    fn next_root(&self) -> Option<usize> {
        (0..self.graph.nodes.len())
            .filter(|&idx| {
                !self.visited[idx] && !self.graph.nodes[idx].optional && self.deps_ready(idx)
            })
            .filter_map(|idx| self.estimates[idx].map(|estimate| (estimate, idx)))
            .min()
            .map(|(_, idx)| idx)
    }

    fn run(mut self) -> Result<Vec<ScheduleStep>> {
        loop {
            let pending = (0..self.graph.edges.len())
                .find_map(|edge_idx| self.direction(edge_idx).map(|forward| (edge_idx, forward)));
            if let Some((edge_idx, forward)) = pending {
                let edge = &self.graph.edges[edge_idx];
                let anchor = if forward { edge.from } else { edge.to };
                self.take_edge(edge_idx, forward);
                self.expand(anchor);
                continue;
            }
            if self.visited.iter().all(|v| *v) && self.done.iter().all(|d| *d) {
                return Ok(self.steps);
            }
            if let Some(root) = self.next_root() {
                self.visited[root] = true;
                self.steps.push(ScheduleStep::Start {
                    node: root,
                    estimate: self.estimates[root].unwrap_or(u64::MAX),
                });
                self.expand(root);
                continue;
            }
            let stuck = self
                .visited
                .iter()
                .position(|v| !*v)
                .or_else(|| {
                    self.done
                        .iter()
                        .position(|d| !*d)
                        .map(|edge| self.graph.edges[edge].to)
                })
                .unwrap_or(0);
            return Err(PlanningError::Unschedulable {
                alias: self.graph.nodes[stuck].alias.clone(),
            }
            .into());
        }
    }
}

/// Orders the evaluation of a compiled graph.
pub(crate) fn schedule<M: MetadataProvider + ?Sized>(
    graph: &PatternGraph,
    metadata: &M,
) -> Result<Schedule> {
    let mut estimates = Vec::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        let estimate = match (&node.constraint.rid, &node.constraint.class) {
            (Some(_), _) => Some(1),
            (None, Some(class)) => Some(metadata.count_class(class, true)?),
            (None, None) => None,
        };
        if estimate == Some(0) && !node.optional {
            tracing::debug!(alias = %node.alias, "mandatory alias has an empty class");
            return Ok(Schedule::Empty {
                alias: node.alias.clone(),
            });
        }
        estimates.push(estimate);
    }
    let scheduler = Scheduler {
        graph,
        estimates,
        visited: vec![false; graph.nodes.len()],
        done: vec![false; graph.edges.len()],
        steps: Vec::new(),
    };
    let steps = scheduler.run()?;
    if tracing::enabled!(tracing::Level::DEBUG) {
        let described: Vec<String> = steps.iter().map(|step| step.describe(graph)).collect();
        tracing::debug!(steps = ?described, "match schedule");
    }
    Ok(Schedule::Steps(steps))
}

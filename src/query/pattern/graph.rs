//! Pattern graph: one node per alias, one edge per pattern item.
//!
//! Every comma-separated pattern contributes nodes and edges to a single
//! graph; an alias named in several patterns is one node, which is how
//! patterns join. Filters on the node are merged across all occurrences.
//! Each node records which other aliases its predicates read through
//! `$matched`, and those dependencies must form a DAG.

use smallvec::SmallVec;

use crate::query::ast::{Expr, MatchExpression, MatchFilter};
use crate::query::errors::PlanningError;
use crate::query::metadata::{narrower_class, MetadataProvider};
use crate::query::pattern::traverse::{Hop, Method, NodeConstraint};
use crate::types::{PenumbraError, Result};

/// Prefix of aliases generated for unnamed pattern nodes.
pub(crate) const HIDDEN_ALIAS_PREFIX: &str = "$anon";

#[derive(Clone, Debug)]
pub(crate) struct PatternNode {
    pub alias: String,
    /// Generated alias, left out of user-facing projections.
    pub hidden: bool,
    pub constraint: NodeConstraint,
    /// Every occurrence of the alias was marked optional.
    pub optional: bool,
    /// Nodes that must be bound before this one can be evaluated.
    pub deps: SmallVec<[usize; 4]>,
    /// Top-level patterns mentioning the alias.
    pub patterns: SmallVec<[usize; 2]>,
}

#[derive(Clone, Debug)]
pub(crate) struct PatternEdge {
    pub from: usize,
    pub to: usize,
    pub hop: Hop,
    pub depth_alias: Option<String>,
    pub path_alias: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct PatternGraph {
    pub nodes: Vec<PatternNode>,
    pub edges: Vec<PatternEdge>,
    pub pattern_count: usize,
}

impl PatternGraph {
    /// Builds the graph and validates aliases and dependencies. Touches only
    /// schema metadata.
    pub fn compile<M: MetadataProvider + ?Sized>(
        metadata: &M,
        patterns: &[MatchExpression],
    ) -> Result<Self> {
        if patterns.is_empty() {
            return Err(PlanningError::malformed("MATCH needs at least one pattern").into());
        }
        let mut graph = PatternGraph {
            pattern_count: patterns.len(),
            ..Self::default()
        };
        let mut anonymous = 0usize;
        for (pattern_idx, pattern) in patterns.iter().enumerate() {
            let origin = &pattern.origin;
            if origin.is_recursive() || origin.depth_alias.is_some() || origin.path_alias.is_some() {
                return Err(PlanningError::malformed(format!(
                    "pattern {} starts with while, maxDepth, depthAlias or pathAlias",
                    pattern_idx + 1
                ))
                .into());
            }
            let mut previous = graph.add_node(metadata, origin, pattern_idx, &mut anonymous)?;
            for item in &pattern.items {
                let target = graph.add_node(metadata, &item.filter, pattern_idx, &mut anonymous)?;
                let method = Method::parse(&item.method);
                if method.is_none() {
                    tracing::warn!(method = %item.method, "unknown traversal method matches nothing");
                }
                graph.edges.push(PatternEdge {
                    from: previous,
                    to: target,
                    hop: Hop {
                        method,
                        labels: item.labels.clone(),
                        while_clause: item.filter.while_clause.clone(),
                        max_depth: item.filter.max_depth,
                    },
                    depth_alias: item.filter.depth_alias.clone(),
                    path_alias: item.filter.path_alias.clone(),
                });
                previous = target;
            }
        }
        graph.check_extra_aliases()?;
        graph.resolve_dependencies()?;
        graph.check_cycles()?;
        Ok(graph)
    }

    pub fn index_of(&self, alias: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.alias == alias)
    }

    fn add_node<M: MetadataProvider + ?Sized>(
        &mut self,
        metadata: &M,
        filter: &MatchFilter,
        pattern: usize,
        anonymous: &mut usize,
    ) -> Result<usize> {
        if let Some(class) = &filter.class {
            metadata.require_class(class)?;
        }
        let (alias, hidden) = match &filter.alias {
            Some(alias) => (alias.clone(), false),
            None => {
                let alias = format!("{HIDDEN_ALIAS_PREFIX}{anonymous}");
                *anonymous += 1;
                (alias, true)
            }
        };
        if let Some(idx) = self.index_of(&alias) {
            let node = &mut self.nodes[idx];
            node.constraint.class = match (node.constraint.class.take(), &filter.class) {
                (Some(current), Some(other)) => Some(narrower_class(metadata, &current, other)?),
                (current, other) => current.or_else(|| other.clone()),
            };
            node.constraint.rid = match (node.constraint.rid, filter.rid) {
                (Some(current), Some(other)) if current != other => {
                    return Err(PlanningError::malformed(format!(
                        "alias '{alias}' is bound to both {current} and {other}"
                    ))
                    .into())
                }
                (current, other) => current.or(other),
            };
            node.constraint.filter = match (node.constraint.filter.take(), &filter.where_clause) {
                (Some(current), Some(other)) => Some(current.and(other.clone())),
                (current, other) => current.or_else(|| other.clone()),
            };
            node.optional &= filter.optional;
            if !node.patterns.contains(&pattern) {
                node.patterns.push(pattern);
            }
            return Ok(idx);
        }
        self.nodes.push(PatternNode {
            alias,
            hidden,
            constraint: NodeConstraint {
                class: filter.class.clone(),
                rid: filter.rid,
                filter: filter.where_clause.clone(),
            },
            optional: filter.optional,
            deps: SmallVec::new(),
            patterns: SmallVec::from_slice(&[pattern]),
        });
        Ok(self.nodes.len() - 1)
    }

    /// Depth and path aliases share the row namespace with node aliases.
    fn check_extra_aliases(&self) -> Result<()> {
        let mut seen: Vec<&str> = Vec::new();
        for edge in &self.edges {
            for alias in edge.depth_alias.iter().chain(edge.path_alias.iter()) {
                if self.index_of(alias).is_some() || seen.contains(&alias.as_str()) {
                    return Err(PlanningError::malformed(format!(
                        "alias '{alias}' is declared more than once"
                    ))
                    .into());
                }
                seen.push(alias);
            }
        }
        Ok(())
    }

    fn dependencies_of(&self, expr: &Expr, context: &str) -> Result<Vec<usize>> {
        expr.matched_aliases()
            .into_iter()
            .map(|alias| {
                self.index_of(&alias)
                    .ok_or_else(|| PenumbraError::from(PlanningError::undefined_alias(alias, context)))
            })
            .collect()
    }

    fn resolve_dependencies(&mut self) -> Result<()> {
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Some(filter) = &node.constraint.filter {
                let context = format!("where clause of '{}'", node.alias);
                deps[idx].extend(self.dependencies_of(filter, &context)?);
            }
        }
        for edge in &self.edges {
            if let Some(condition) = &edge.hop.while_clause {
                let context = format!("while clause of '{}'", self.nodes[edge.to].alias);
                deps[edge.to].extend(self.dependencies_of(condition, &context)?);
            }
        }
        for (node, mut list) in self.nodes.iter_mut().zip(deps) {
            list.sort_unstable();
            list.dedup();
            node.deps = SmallVec::from_vec(list);
        }
        Ok(())
    }

    /// Depth-first colouring over the dependency relation; the first back
    /// edge found is reported as the cycle `a -> b -> ... -> a`.
    fn check_cycles(&self) -> Result<()> {
        #[derive(Copy, Clone, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut color = vec![Color::White; self.nodes.len()];
        for start in 0..self.nodes.len() {
            if color[start] != Color::White {
                continue;
            }
            color[start] = Color::Gray;
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let Some(&dep) = self.nodes[node].deps.get(top.1) else {
                    color[node] = Color::Black;
                    stack.pop();
                    continue;
                };
                top.1 += 1;
                match color[dep] {
                    Color::White => {
                        color[dep] = Color::Gray;
                        stack.push((dep, 0));
                    }
                    Color::Gray => {
                        let from = stack.iter().position(|(idx, _)| *idx == dep).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[from..]
                            .iter()
                            .map(|(idx, _)| self.nodes[*idx].alias.clone())
                            .collect();
                        cycle.push(self.nodes[dep].alias.clone());
                        return Err(PlanningError::CircularDependency { cycle }.into());
                    }
                    Color::Black => {}
                }
            }
        }
        Ok(())
    }

    /// Compiles NOT patterns against the positive graph.
    pub fn compile_negations<M: MetadataProvider + ?Sized>(
        &self,
        metadata: &M,
        patterns: &[MatchExpression],
    ) -> Result<Vec<NotPattern>> {
        patterns
            .iter()
            .map(|pattern| self.compile_negation(metadata, pattern))
            .collect()
    }

    fn compile_negation<M: MetadataProvider + ?Sized>(
        &self,
        metadata: &M,
        pattern: &MatchExpression,
    ) -> Result<NotPattern> {
        let origin = &pattern.origin;
        let Some(alias) = &origin.alias else {
            return Err(PlanningError::malformed("NOT pattern must start from a bound alias").into());
        };
        if self.index_of(alias).is_none() {
            return Err(PlanningError::undefined_alias(alias.clone(), "NOT pattern origin").into());
        }
        let bare = MatchFilter {
            alias: Some(alias.clone()),
            ..MatchFilter::default()
        };
        if *origin != bare {
            return Err(PlanningError::malformed(format!(
                "NOT pattern origin '{alias}' cannot carry its own filter"
            ))
            .into());
        }
        let mut locals: Vec<String> = Vec::new();
        let mut steps = Vec::with_capacity(pattern.items.len());
        for item in &pattern.items {
            let filter = &item.filter;
            if filter.optional || filter.depth_alias.is_some() || filter.path_alias.is_some() {
                return Err(PlanningError::malformed(
                    "NOT pattern items cannot be optional or declare depth/path aliases",
                )
                .into());
            }
            if let Some(class) = &filter.class {
                metadata.require_class(class)?;
            }
            let known = |name: &str| self.index_of(name).is_some() || locals.iter().any(|l| l == name);
            for expr in filter.where_clause.iter().chain(filter.while_clause.iter()) {
                if let Some(missing) = expr.matched_aliases().into_iter().find(|name| !known(name)) {
                    return Err(PlanningError::undefined_alias(missing, "NOT pattern").into());
                }
            }
            let bound = filter
                .alias
                .as_ref()
                .is_some_and(|name| self.index_of(name).is_some());
            if let Some(name) = filter.alias.as_ref().filter(|_| !bound) {
                if locals.contains(name) {
                    return Err(PlanningError::malformed(format!(
                        "alias '{name}' repeats inside a NOT pattern"
                    ))
                    .into());
                }
                locals.push(name.clone());
            }
            steps.push(NotStep {
                hop: Hop {
                    method: Method::parse(&item.method),
                    labels: item.labels.clone(),
                    while_clause: filter.while_clause.clone(),
                    max_depth: filter.max_depth,
                },
                constraint: NodeConstraint {
                    class: filter.class.clone(),
                    rid: filter.rid,
                    filter: filter.where_clause.clone(),
                },
                alias: filter.alias.clone(),
                bound,
            });
        }
        Ok(NotPattern {
            origin: alias.clone(),
            steps,
        })
    }
}

/// One hop of a NOT pattern.
#[derive(Clone, Debug)]
pub(crate) struct NotStep {
    pub hop: Hop,
    pub constraint: NodeConstraint,
    pub alias: Option<String>,
    /// The alias is bound by the positive patterns; the hop must reach it.
    pub bound: bool,
}

/// A chain that must not exist from an already-bound alias.
#[derive(Clone, Debug)]
pub(crate) struct NotPattern {
    pub origin: String,
    pub steps: Vec<NotStep>,
}

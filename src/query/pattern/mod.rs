//! MATCH: graph pattern compilation, scheduling and evaluation.
//!
//! Planning a MATCH runs entirely against schema metadata: the patterns are
//! merged into one alias graph, alias dependencies are checked for
//! undefined references and cycles, and an evaluation order is fixed. Only
//! then is a [`MatchStep`] built; it enumerates bindings lazily, so the
//! statement composes with projection, sorting and paging like any source.

mod graph;
mod matcher;
mod returns;
mod schedule;
mod traverse;

use std::sync::Arc;

use crate::query::ast::{MatchReturn, MatchStatement};
use crate::query::planner::{Planner, Tail};
use crate::query::step::{BoxStep, EmptyStep};
use crate::types::Result;

pub(crate) use graph::{NotPattern, PatternGraph};
pub(crate) use matcher::MatchStep;
pub(crate) use returns::{FilterNotPatternStep, ReturnMatchStep};
pub(crate) use returns::{MatchShape, ReturnMode};
pub(crate) use schedule::{schedule, Schedule, ScheduleStep};

/// Aliases in the order the schedule binds them.
fn evaluation_order(graph: &PatternGraph, steps: &[ScheduleStep]) -> Vec<usize> {
    let mut order = Vec::with_capacity(graph.nodes.len());
    for step in steps {
        let node = match *step {
            ScheduleStep::Start { node, .. } => node,
            ScheduleStep::Traverse { edge, forward } => {
                let edge = &graph.edges[edge];
                if forward {
                    edge.to
                } else {
                    edge.from
                }
            }
        };
        if !order.contains(&node) {
            order.push(node);
        }
    }
    order
}

fn shape(graph: &PatternGraph, order: &[usize]) -> MatchShape {
    let patterns = (0..graph.pattern_count)
        .map(|pattern| {
            order
                .iter()
                .map(|idx| &graph.nodes[*idx])
                .filter(|node| !node.hidden && node.patterns.contains(&pattern))
                .map(|node| node.alias.clone())
                .collect()
        })
        .collect();
    MatchShape {
        order: order
            .iter()
            .map(|idx| (graph.nodes[*idx].alias.clone(), graph.nodes[*idx].hidden))
            .collect(),
        patterns,
        extras: graph
            .edges
            .iter()
            .flat_map(|edge| edge.depth_alias.iter().chain(edge.path_alias.iter()))
            .cloned()
            .collect(),
    }
}

/// Plans a MATCH statement.
pub(crate) fn plan_match(planner: &Planner<'_>, statement: &MatchStatement) -> Result<BoxStep> {
    let gateway = planner.gateway();
    let graph = PatternGraph::compile(gateway, &statement.patterns)?;
    let negations: Vec<NotPattern> = graph.compile_negations(gateway, &statement.not_patterns)?;
    let mut step: BoxStep = match schedule(&graph, gateway)? {
        Schedule::Empty { alias } => {
            tracing::debug!(%alias, "match short-circuited on an empty class");
            Box::new(EmptyStep::new("empty root class"))
        }
        Schedule::Steps(steps) => {
            let order = evaluation_order(&graph, &steps);
            let shape = shape(&graph, &order);
            let mut step: BoxStep = Box::new(MatchStep::new(
                Arc::new(graph),
                steps,
                planner.config().clone(),
            ));
            if !negations.is_empty() {
                step = Box::new(FilterNotPatternStep::new(step, negations));
            }
            if let Some(mode) = return_mode(&statement.returns) {
                step = Box::new(ReturnMatchStep::new(step, mode, shape));
            }
            step
        }
    };
    let projection = match &statement.returns {
        MatchReturn::Items(items) => items.as_slice(),
        _ => &[],
    };
    let tail = Tail {
        projection,
        distinct: statement.distinct,
        group_by: &statement.group_by,
        order_by: &statement.order_by,
        skip: statement.skip.as_ref(),
        limit: statement.limit.as_ref(),
    };
    step = planner.plan_tail(step, &tail, false)?;
    Ok(step)
}

fn return_mode(returns: &MatchReturn) -> Option<ReturnMode> {
    match returns {
        MatchReturn::Items(_) => None,
        MatchReturn::Matches => Some(ReturnMode::Matches),
        MatchReturn::Patterns => Some(ReturnMode::Patterns),
        MatchReturn::Paths => Some(ReturnMode::Paths),
        MatchReturn::Elements => Some(ReturnMode::Elements),
        MatchReturn::PathElements => Some(ReturnMode::PathElements),
    }
}

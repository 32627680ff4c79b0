//! Backtracking matcher over a scheduled pattern graph.
//!
//! The matcher keeps an explicit stack of frames, one per schedule step
//! currently being enumerated. Each frame owns the bindings that held when
//! it was entered and a candidate source (a root lookup, a prefetched id
//! list or a traversal cursor). Pulling a row advances the top frame; a
//! candidate pushes the next frame, exhaustion pops back to the previous
//! one. Nothing is recursive, so a match can be suspended between any two
//! `next` calls and abandoned by dropping the stack.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::query::context::CommandContext;
use crate::query::errors::PlanningError;
use crate::query::pattern::graph::PatternGraph;
use crate::query::pattern::schedule::ScheduleStep;
use crate::query::pattern::traverse::{TraversalCursor, Traverser};
use crate::query::plan::ExplainProp;
use crate::query::planner::{ClassPlan, Planner, PlannerConfig};
use crate::query::row::ResultRow;
use crate::query::step::{BoxStep, ExecutionStep, StepCore};
use crate::query::value::Value;
use crate::types::{PenumbraError, RecordId, Result};

/// Row metadata key holding the alias map of a match.
pub(crate) const MATCHED_METADATA: &str = "matched";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    Unbound,
    /// Optional alias with no match.
    Null,
    Bound(RecordId),
}

impl Slot {
    fn value(self) -> Value {
        match self {
            Slot::Bound(rid) => Value::Link(rid),
            Slot::Null | Slot::Unbound => Value::Null,
        }
    }
}

#[derive(Clone, Debug)]
struct Bindings {
    slots: Vec<Slot>,
    /// Depth and path aliases.
    extras: BTreeMap<String, Value>,
}

impl Bindings {
    fn new(nodes: usize) -> Self {
        Self {
            slots: vec![Slot::Unbound; nodes],
            extras: BTreeMap::new(),
        }
    }

    /// `$matched` as seen by predicates: the aliases bound so far.
    fn matched(&self, graph: &PatternGraph) -> Value {
        Value::Map(
            graph
                .nodes
                .iter()
                .zip(&self.slots)
                .filter(|(_, slot)| **slot != Slot::Unbound)
                .map(|(node, slot)| (node.alias.clone(), slot.value()))
                .collect(),
        )
    }
}

enum Candidates {
    Pending,
    Plan { step: BoxStep, scope: CommandContext },
    Listed { ids: Arc<[RecordId]>, pos: usize },
    Single(Option<RecordId>),
    Walk(TraversalCursor),
    Done,
}

struct Frame {
    step: usize,
    bindings: Bindings,
    matched: Value,
    candidates: Candidates,
    produced: bool,
}

impl Frame {
    fn close(&mut self) {
        if let Candidates::Plan { step, .. } = &mut self.candidates {
            step.close();
        }
        self.candidates = Candidates::Done;
    }
}

/// Enumerates every consistent binding of the pattern aliases.
///
/// Each output row maps every alias (generated ones included) to a link or
/// null, plus depth and path aliases; the alias map is also attached as row
/// metadata for the steps that reshape matches.
pub struct MatchStep {
    core: StepCore,
    graph: Arc<PatternGraph>,
    schedule: Vec<ScheduleStep>,
    planner: PlannerConfig,
    traverser: Traverser,
    /// Root access paths per schedule step, planned once at start.
    roots: Vec<Option<ClassPlan>>,
    prefetched: Vec<Option<Arc<[RecordId]>>>,
    stack: Vec<Frame>,
}

impl MatchStep {
    pub(crate) fn new(graph: Arc<PatternGraph>, schedule: Vec<ScheduleStep>, planner: PlannerConfig) -> Self {
        let steps = schedule.len();
        Self {
            core: StepCore::new(),
            graph,
            schedule,
            planner,
            traverser: Traverser::new(1),
            roots: vec![None; steps],
            prefetched: vec![None; steps],
            stack: Vec::new(),
        }
    }

    fn push_frame(&mut self, step: usize, bindings: Bindings) {
        let matched = bindings.matched(&self.graph);
        self.stack.push(Frame {
            step,
            bindings,
            matched,
            candidates: Candidates::Pending,
            produced: false,
        });
    }

    /// Plans every class-constrained root: a class scan (index-accelerated
    /// when possible) filtered by the node predicate.
    fn plan_roots(&mut self, ctx: &CommandContext) -> Result<()> {
        let planner = Planner::new(self.planner.clone(), ctx.gateway());
        for (step, scheduled) in self.schedule.iter().enumerate() {
            let ScheduleStep::Start { node, .. } = *scheduled else {
                continue;
            };
            let constraint = &self.graph.nodes[node].constraint;
            if constraint.rid.is_some() {
                continue;
            }
            if let Some(class) = &constraint.class {
                let plan = planner.plan_class(class, true, constraint.filter.as_ref(), None)?;
                self.roots[step] = Some(plan);
            }
        }
        Ok(())
    }

    /// Fresh lookup steps for a root, built from its planned access path.
    fn root_plan(
        &self,
        step: usize,
        node: usize,
        matched: &Value,
        ctx: &CommandContext,
    ) -> Result<(BoxStep, CommandContext)> {
        let Some(root) = &self.roots[step] else {
            return Err(PlanningError::Unschedulable {
                alias: self.graph.nodes[node].alias.clone(),
            }
            .into());
        };
        let plan = root.build().filtered();
        let mut scope = ctx.child();
        scope.set_variable("matched", matched.clone());
        scope.set_variable("depth", Value::Int(0));
        Ok((plan, scope))
    }

    fn open_root(
        &mut self,
        step: usize,
        node: usize,
        estimate: u64,
        matched: &Value,
        ctx: &CommandContext,
    ) -> Result<Candidates> {
        let pattern_node = &self.graph.nodes[node];
        if let Some(rid) = pattern_node.constraint.rid {
            return Ok(Candidates::Single(Some(rid)));
        }
        let prefetch = pattern_node.deps.is_empty() && estimate <= ctx.config().prefetch_threshold;
        if !prefetch {
            let (mut plan, mut scope) = self.root_plan(step, node, matched, ctx)?;
            plan.start(&mut scope)?;
            return Ok(Candidates::Plan { step: plan, scope });
        }
        if let Some(ids) = &self.prefetched[step] {
            return Ok(Candidates::Listed {
                ids: Arc::clone(ids),
                pos: 0,
            });
        }
        let (mut plan, mut scope) = self.root_plan(step, node, matched, ctx)?;
        plan.start(&mut scope)?;
        let collected = collect_ids(&mut plan, &mut scope, ctx);
        plan.close();
        let ids: Arc<[RecordId]> = collected?.into();
        tracing::trace!(alias = %pattern_node.alias, rows = ids.len(), "prefetched entry point");
        self.prefetched[step] = Some(Arc::clone(&ids));
        Ok(Candidates::Listed { ids, pos: 0 })
    }

    fn next_root(
        &mut self,
        frame: &mut Frame,
        node: usize,
        estimate: u64,
        ctx: &CommandContext,
    ) -> Result<Option<Bindings>> {
        if matches!(frame.candidates, Candidates::Pending) {
            frame.candidates = self.open_root(frame.step, node, estimate, &frame.matched, ctx)?;
        }
        let verify = matches!(frame.candidates, Candidates::Single(_));
        loop {
            let pulled = match &mut frame.candidates {
                Candidates::Plan { step, scope } => step.next(scope)?.map(|row| row.identity()),
                Candidates::Listed { ids, pos } => {
                    let rid = ids.get(*pos).copied();
                    *pos += 1;
                    rid.map(Some)
                }
                Candidates::Single(rid) => rid.take().map(Some),
                Candidates::Pending | Candidates::Walk(_) | Candidates::Done => None,
            };
            let Some(rid) = pulled else {
                frame.close();
                return Ok(None);
            };
            let Some(rid) = rid else {
                continue;
            };
            if verify
                && !self
                    .traverser
                    .accepts(&self.graph.nodes[node].constraint, rid, 0, &frame.matched, ctx)?
            {
                continue;
            }
            let mut bindings = frame.bindings.clone();
            bindings.slots[node] = Slot::Bound(rid);
            return Ok(Some(bindings));
        }
    }

    fn next_hop(
        &mut self,
        frame: &mut Frame,
        edge_idx: usize,
        forward: bool,
        ctx: &CommandContext,
    ) -> Result<Option<Bindings>> {
        let graph = Arc::clone(&self.graph);
        let edge = &graph.edges[edge_idx];
        let (source, target) = if forward {
            (edge.from, edge.to)
        } else {
            (edge.to, edge.from)
        };
        let target_node = &graph.nodes[target];
        let target_slot = frame.bindings.slots[target];
        if target_slot == Slot::Null {
            if frame.produced {
                return Ok(None);
            }
            frame.produced = true;
            return Ok(Some(frame.bindings.clone()));
        }
        if matches!(frame.candidates, Candidates::Pending) {
            frame.candidates = match frame.bindings.slots[source] {
                Slot::Bound(rid) => Candidates::Walk(TraversalCursor::new(rid, &edge.hop, forward)),
                Slot::Null | Slot::Unbound => Candidates::Done,
            };
        }
        loop {
            let reached = match &mut frame.candidates {
                Candidates::Walk(cursor) => cursor.next(&mut self.traverser, &frame.matched, ctx)?,
                _ => None,
            };
            let Some(reached) = reached else {
                frame.candidates = Candidates::Done;
                if !frame.produced && target_node.optional && target_slot == Slot::Unbound {
                    frame.produced = true;
                    let mut bindings = frame.bindings.clone();
                    bindings.slots[target] = Slot::Null;
                    for alias in edge.depth_alias.iter().chain(edge.path_alias.iter()) {
                        bindings.extras.insert(alias.clone(), Value::Null);
                    }
                    return Ok(Some(bindings));
                }
                return Ok(None);
            };
            ctx.check_interrupt()?;
            let accepted = match target_slot {
                Slot::Bound(rid) => rid == reached.rid,
                Slot::Null | Slot::Unbound => self.traverser.accepts(
                    &target_node.constraint,
                    reached.rid,
                    reached.depth,
                    &frame.matched,
                    ctx,
                )?,
            };
            if !accepted {
                continue;
            }
            frame.produced = true;
            let mut bindings = frame.bindings.clone();
            bindings.slots[target] = Slot::Bound(reached.rid);
            if let Some(alias) = &edge.depth_alias {
                bindings
                    .extras
                    .insert(alias.clone(), Value::Int(i64::from(reached.depth)));
            }
            if let Some(alias) = &edge.path_alias {
                let path = reached.path.iter().copied().map(Value::Link).collect();
                bindings.extras.insert(alias.clone(), Value::List(path));
            }
            return Ok(Some(bindings));
        }
    }

    fn advance(&mut self, frame: &mut Frame, ctx: &CommandContext) -> Result<Option<Bindings>> {
        match self.schedule[frame.step] {
            ScheduleStep::Start { node, estimate } => self.next_root(frame, node, estimate, ctx),
            ScheduleStep::Traverse { edge, forward } => self.next_hop(frame, edge, forward, ctx),
        }
    }

    fn emit(&self, bindings: &Bindings) -> ResultRow {
        let matched: BTreeMap<String, Value> = self
            .graph
            .nodes
            .iter()
            .zip(&bindings.slots)
            .map(|(node, slot)| (node.alias.clone(), slot.value()))
            .collect();
        let props = matched
            .iter()
            .chain(&bindings.extras)
            .map(|(name, value)| (name.clone(), value.clone()));
        let mut row = ResultRow::from_props(props);
        row.set_metadata(MATCHED_METADATA, Value::Map(matched));
        row
    }
}

fn collect_ids(plan: &mut BoxStep, scope: &mut CommandContext, ctx: &CommandContext) -> Result<Vec<RecordId>> {
    let mut ids = Vec::new();
    while let Some(row) = plan.next(scope)? {
        if let Some(rid) = row.identity() {
            ids.push(rid);
            ctx.ensure_heap("MatchPrefetch", ids.len())?;
        }
    }
    Ok(ids)
}

impl ExecutionStep for MatchStep {
    fn name(&self) -> &'static str {
        "Match"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        if self.schedule.is_empty() {
            return Err(PenumbraError::Invalid("match step without a schedule"));
        }
        self.traverser = Traverser::new(ctx.config().record_cache_capacity);
        self.plan_roots(ctx)?;
        let bindings = Bindings::new(self.graph.nodes.len());
        self.push_frame(0, bindings);
        Ok(())
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        loop {
            ctx.check_interrupt()?;
            let Some(mut frame) = self.stack.pop() else {
                return Ok(None);
            };
            let advanced = match self.advance(&mut frame, ctx) {
                Ok(advanced) => advanced,
                Err(err) => {
                    frame.close();
                    return Err(err);
                }
            };
            let Some(bindings) = advanced else {
                frame.close();
                continue;
            };
            let next = frame.step + 1;
            self.stack.push(frame);
            if next == self.schedule.len() {
                return Ok(Some(self.emit(&bindings)));
            }
            self.push_frame(next, bindings);
        }
    }

    fn on_close(&mut self) {
        for frame in &mut self.stack {
            frame.close();
        }
        self.stack.clear();
        self.prefetched.iter_mut().for_each(|ids| *ids = None);
    }

    fn props(&self) -> Vec<ExplainProp> {
        let aliases: Vec<&str> = self
            .graph
            .nodes
            .iter()
            .filter(|node| !node.hidden)
            .map(|node| node.alias.as_str())
            .collect();
        let mut props = vec![ExplainProp::plain("aliases", aliases.join(", "))];
        props.extend(self.schedule.iter().enumerate().map(|(idx, step)| {
            ExplainProp::plain(format!("step{}", idx + 1), step.describe(&self.graph))
        }));
        props
    }
}

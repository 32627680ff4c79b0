//! Steps that reshape raw matches: NOT-pattern filtering and the
//! `$matches`/`$patterns`/`$paths`/`$elements`/`$pathElements` views.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::query::context::CommandContext;
use crate::query::pattern::graph::NotPattern;
use crate::query::pattern::matcher::MATCHED_METADATA;
use crate::query::pattern::traverse::{TraversalCursor, Traverser};
use crate::query::plan::ExplainProp;
use crate::query::row::ResultRow;
use crate::query::step::{load_row, BoxStep, ExecutionStep, StepCore};
use crate::query::value::Value;
use crate::types::Result;

/// Alias map of a match row.
fn matched_of(row: &ResultRow) -> BTreeMap<String, Value> {
    match row.metadata(MATCHED_METADATA) {
        Some(Value::Map(map)) => map.clone(),
        _ => row.properties().clone(),
    }
}

/// Drops matches for which any NOT pattern can be completed.
pub struct FilterNotPatternStep {
    core: StepCore,
    input: BoxStep,
    patterns: Vec<NotPattern>,
    traverser: Traverser,
}

impl FilterNotPatternStep {
    pub(crate) fn new(input: BoxStep, patterns: Vec<NotPattern>) -> Self {
        Self {
            core: StepCore::new(),
            input,
            patterns,
            traverser: Traverser::new(1),
        }
    }

    /// Existence check: depth-first over the pattern hops with one cursor
    /// per hop on an explicit stack.
    fn exists(
        traverser: &mut Traverser,
        pattern: &NotPattern,
        matched: &BTreeMap<String, Value>,
        ctx: &CommandContext,
    ) -> Result<bool> {
        let Some(origin) = matched.get(&pattern.origin).and_then(Value::as_link) else {
            return Ok(false);
        };
        let Some(first) = pattern.steps.first() else {
            return Ok(true);
        };
        let mut stack = vec![(
            0usize,
            TraversalCursor::new(origin, &first.hop, true),
            Value::Map(matched.clone()),
        )];
        while let Some((step_idx, cursor, scope)) = stack.last_mut() {
            ctx.check_interrupt()?;
            let Some(reached) = cursor.next(traverser, scope, ctx)? else {
                stack.pop();
                continue;
            };
            let step = &pattern.steps[*step_idx];
            if step.bound {
                let expected = step
                    .alias
                    .as_ref()
                    .and_then(|alias| matched.get(alias))
                    .and_then(Value::as_link);
                if expected != Some(reached.rid) {
                    continue;
                }
            }
            if !traverser.accepts(&step.constraint, reached.rid, reached.depth, scope, ctx)? {
                continue;
            }
            let next_idx = *step_idx + 1;
            let Some(next) = pattern.steps.get(next_idx) else {
                return Ok(true);
            };
            let mut extended = scope.clone();
            if let (Some(alias), Value::Map(map)) = (&step.alias, &mut extended) {
                map.insert(alias.clone(), Value::Link(reached.rid));
            }
            let cursor = TraversalCursor::new(reached.rid, &next.hop, true);
            stack.push((next_idx, cursor, extended));
        }
        Ok(false)
    }
}

impl ExecutionStep for FilterNotPatternStep {
    fn name(&self) -> &'static str {
        "FilterNotPattern"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        self.traverser = Traverser::new(ctx.config().record_cache_capacity);
        self.input.start(ctx)
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        'rows: while let Some(row) = self.input.next(ctx)? {
            let matched = matched_of(&row);
            for pattern in &self.patterns {
                if Self::exists(&mut self.traverser, pattern, &matched, ctx)? {
                    continue 'rows;
                }
            }
            return Ok(Some(row));
        }
        Ok(None)
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn props(&self) -> Vec<ExplainProp> {
        self.patterns
            .iter()
            .map(|pattern| {
                let hops: Vec<String> = pattern
                    .steps
                    .iter()
                    .map(|step| {
                        let alias = step.alias.as_deref().unwrap_or("?");
                        format!(".{}{{{alias}}}", step.hop.describe(true))
                    })
                    .collect();
                ExplainProp::plain("not", format!("{{{}}}{}", pattern.origin, hops.concat()))
            })
            .collect()
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// Shape of the rows a MATCH returns when no projection is given.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ReturnMode {
    Matches,
    Patterns,
    Paths,
    Elements,
    PathElements,
}

impl ReturnMode {
    fn label(self) -> &'static str {
        match self {
            ReturnMode::Matches => "$matches",
            ReturnMode::Patterns => "$patterns",
            ReturnMode::Paths => "$paths",
            ReturnMode::Elements => "$elements",
            ReturnMode::PathElements => "$pathElements",
        }
    }
}

/// Alias layout needed to reshape matches.
#[derive(Clone, Debug, Default)]
pub(crate) struct MatchShape {
    /// Aliases in evaluation order, with their hidden flag.
    pub order: Vec<(String, bool)>,
    /// Named aliases of each top-level pattern, in evaluation order.
    pub patterns: Vec<Vec<String>>,
    /// Depth and path aliases.
    pub extras: Vec<String>,
}

/// Turns each match into zero or more rows of the requested view.
pub struct ReturnMatchStep {
    core: StepCore,
    input: BoxStep,
    mode: ReturnMode,
    shape: MatchShape,
    pending: VecDeque<ResultRow>,
    seen: BTreeSet<(usize, Value)>,
}

impl ReturnMatchStep {
    pub(crate) fn new(input: BoxStep, mode: ReturnMode, shape: MatchShape) -> Self {
        Self {
            core: StepCore::new(),
            input,
            mode,
            shape,
            pending: VecDeque::new(),
            seen: BTreeSet::new(),
        }
    }

    fn expand(&mut self, row: &ResultRow, ctx: &CommandContext) -> Result<()> {
        let matched = matched_of(row);
        let value_of = |alias: &str| matched.get(alias).cloned().unwrap_or(Value::Null);
        match self.mode {
            ReturnMode::Matches => {
                let props = self
                    .shape
                    .order
                    .iter()
                    .filter(|(_, hidden)| !hidden)
                    .map(|(alias, _)| (alias.clone(), value_of(alias)))
                    .chain(self.shape.extras.iter().filter_map(|alias| {
                        row.property(alias).map(|value| (alias.clone(), value.clone()))
                    }));
                self.pending.push_back(ResultRow::from_props(props));
            }
            ReturnMode::Patterns => {
                for (idx, aliases) in self.shape.patterns.iter().enumerate() {
                    if aliases.is_empty() {
                        continue;
                    }
                    let props: BTreeMap<String, Value> = aliases
                        .iter()
                        .map(|alias| (alias.clone(), value_of(alias)))
                        .collect();
                    if self.seen.insert((idx, Value::Map(props.clone()))) {
                        ctx.ensure_heap("MatchPatterns", self.seen.len())?;
                        self.pending.push_back(ResultRow::from_props(props));
                    }
                }
            }
            ReturnMode::Paths => {
                let mut so_far = Vec::with_capacity(self.shape.order.len());
                for (alias, _) in &self.shape.order {
                    so_far.push((alias.clone(), value_of(alias)));
                    self.pending.push_back(ResultRow::from_props(so_far.clone()));
                }
            }
            ReturnMode::Elements | ReturnMode::PathElements => {
                let include_hidden = self.mode == ReturnMode::PathElements;
                for (alias, hidden) in &self.shape.order {
                    if *hidden && !include_hidden {
                        continue;
                    }
                    let Some(rid) = value_of(alias).as_link() else {
                        continue;
                    };
                    if let Some(element) = load_row(ctx.gateway(), rid)? {
                        self.pending.push_back(element);
                    }
                }
            }
        }
        Ok(())
    }
}

impl ExecutionStep for ReturnMatchStep {
    fn name(&self) -> &'static str {
        "ReturnMatch"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        self.input.start(ctx)
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(row) = self.input.next(ctx)? else {
                return Ok(None);
            };
            self.expand(&row, ctx)?;
        }
    }

    fn on_close(&mut self) {
        self.input.close();
        self.pending.clear();
        self.seen.clear();
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("return", self.mode.label())]
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

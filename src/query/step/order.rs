//! Sorting, de-duplication and row-count windows.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::query::ast::{Expr, OrderItem, SortDirection};
use crate::query::context::CommandContext;
use crate::query::expr::{eval, Scope};
use crate::query::plan::ExplainProp;
use crate::query::row::ResultRow;
use crate::query::step::{BoxStep, ExecutionStep, StepCore};
use crate::query::value::Value;
use crate::types::{PenumbraError, Result};

/// Materialises its input and emits it sorted.
///
/// Buffered rows count against the heap-element cap. With a known row window
/// (`SKIP` + `LIMIT`) only the best `window` rows are retained.
pub struct OrderByStep {
    core: StepCore,
    input: BoxStep,
    items: Vec<OrderItem>,
    window: Option<usize>,
    output: Option<std::vec::IntoIter<ResultRow>>,
}

impl OrderByStep {
    pub fn new(input: BoxStep, items: Vec<OrderItem>, window: Option<usize>) -> Self {
        Self {
            core: StepCore::new(),
            input,
            items,
            window,
            output: None,
        }
    }

    fn compare(&self, left: &[Value], right: &[Value]) -> Ordering {
        for ((item, l), r) in self.items.iter().zip(left).zip(right) {
            let ord = l.total_cmp(r);
            let ord = match item.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn sort(&self, buffer: &mut Vec<(Vec<Value>, ResultRow)>) {
        buffer.sort_by(|(left, _), (right, _)| self.compare(left, right));
        if let Some(window) = self.window {
            buffer.truncate(window);
        }
    }

    fn materialise(&mut self, ctx: &mut CommandContext) -> Result<Vec<ResultRow>> {
        let mut buffer: Vec<(Vec<Value>, ResultRow)> = Vec::new();
        while let Some(row) = self.input.next(ctx)? {
            let scope = Scope::row(&row);
            let keys = self
                .items
                .iter()
                .map(|item| eval(&item.expr, &scope, ctx))
                .collect::<Result<Vec<_>>>()?;
            buffer.push((keys, row));
            if let Some(window) = self.window {
                if buffer.len() >= window.saturating_mul(2).max(1) {
                    self.sort(&mut buffer);
                }
            }
            ctx.ensure_heap("OrderBy", buffer.len())?;
        }
        self.sort(&mut buffer);
        Ok(buffer.into_iter().map(|(_, row)| row).collect())
    }
}

impl ExecutionStep for OrderByStep {
    fn name(&self) -> &'static str {
        "OrderBy"
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
        if self.output.is_none() {
            let rows = self.materialise(ctx)?;
            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next))
    }

    fn on_close(&mut self) {
        self.input.close();
        self.output = None;
    }

    fn props(&self) -> Vec<ExplainProp> {
        let keys: Vec<String> = self
            .items
            .iter()
            .map(|item| match item.direction {
                SortDirection::Asc => format!("{} ASC", item.expr),
                SortDirection::Desc => format!("{} DESC", item.expr),
            })
            .collect();
        let mut props = vec![ExplainProp::plain("keys", keys.join(", "))];
        if let Some(window) = self.window {
            props.push(ExplainProp::plain("window", window.to_string()));
        }
        props
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// Drops rows equal to one already emitted (identity for elements,
/// properties for projections).
pub struct DistinctStep {
    core: StepCore,
    input: BoxStep,
    seen: BTreeSet<Value>,
}

impl DistinctStep {
    pub fn new(input: BoxStep) -> Self {
        Self {
            core: StepCore::new(),
            input,
            seen: BTreeSet::new(),
        }
    }
}

impl ExecutionStep for DistinctStep {
    fn name(&self) -> &'static str {
        "Distinct"
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
        while let Some(row) = self.input.next(ctx)? {
            if self.seen.insert(row.distinct_key()) {
                ctx.ensure_heap("Distinct", self.seen.len())?;
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn on_close(&mut self) {
        self.input.close();
        self.seen.clear();
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// Evaluates a SKIP/LIMIT operand; negative LIMIT means unbounded.
fn window_size(expr: &Expr, ctx: &CommandContext, clause: &str) -> Result<Option<u64>> {
    match eval(expr, &Scope::empty(), ctx)? {
        Value::Int(n) if n >= 0 => Ok(Some(n as u64)),
        Value::Int(_) if clause == "LIMIT" => Ok(None),
        other => Err(PenumbraError::CommandExecution(format!(
            "{clause} expects a non-negative integer, got {}",
            other.type_name()
        ))),
    }
}

/// Discards the first N rows.
pub struct SkipStep {
    core: StepCore,
    input: BoxStep,
    skip: Expr,
    skipped: bool,
}

impl SkipStep {
    pub fn new(input: BoxStep, skip: Expr) -> Self {
        Self {
            core: StepCore::new(),
            input,
            skip,
            skipped: false,
        }
    }
}

impl ExecutionStep for SkipStep {
    fn name(&self) -> &'static str {
        "Skip"
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
        if !self.skipped {
            self.skipped = true;
            let count = window_size(&self.skip, ctx, "SKIP")?.unwrap_or(0);
            for _ in 0..count {
                if self.input.next(ctx)?.is_none() {
                    return Ok(None);
                }
            }
        }
        self.input.next(ctx)
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::literal("skip", self.skip.to_string())]
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// Stops after N rows without pulling further from upstream.
pub struct LimitStep {
    core: StepCore,
    input: BoxStep,
    limit: Expr,
    remaining: Option<Option<u64>>,
}

impl LimitStep {
    pub fn new(input: BoxStep, limit: Expr) -> Self {
        Self {
            core: StepCore::new(),
            input,
            limit,
            remaining: None,
        }
    }
}

impl ExecutionStep for LimitStep {
    fn name(&self) -> &'static str {
        "Limit"
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
        let remaining = match self.remaining {
            Some(remaining) => remaining,
            None => {
                let limit = window_size(&self.limit, ctx, "LIMIT")?;
                self.remaining = Some(limit);
                limit
            }
        };
        match remaining {
            Some(0) => Ok(None),
            Some(n) => {
                let row = self.input.next(ctx)?;
                self.remaining = Some(Some(n - 1));
                Ok(row)
            }
            None => self.input.next(ctx),
        }
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::literal("limit", self.limit.to_string())]
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

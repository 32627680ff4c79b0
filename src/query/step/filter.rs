//! Row filtering and LET bindings.

use crate::query::ast::{Expr, LetItem, LetValue};
use crate::query::context::CommandContext;
use crate::query::executor::run_nested;
use crate::query::expr::{eval, eval_predicate, row_to_value, Scope};
use crate::query::plan::ExplainProp;
use crate::query::row::ResultRow;
use crate::query::step::{BoxStep, ExecutionStep, StepCore};
use crate::query::value::Value;
use crate::types::Result;

/// Passes through the rows for which the predicate is true.
pub struct FilterStep {
    core: StepCore,
    input: BoxStep,
    predicate: Expr,
}

impl FilterStep {
    pub fn new(input: BoxStep, predicate: Expr) -> Self {
        Self {
            core: StepCore::new(),
            input,
            predicate,
        }
    }
}

impl ExecutionStep for FilterStep {
    fn name(&self) -> &'static str {
        "Filter"
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
            if eval_predicate(&self.predicate, &Scope::row(&row), ctx)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::literal("predicate", self.predicate.to_string())]
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

fn let_value(item: &LetItem, row: Option<&ResultRow>, ctx: &CommandContext) -> Result<Value> {
    match &item.value {
        LetValue::Expr(expr) => {
            let scope = row.map_or_else(Scope::empty, Scope::row);
            eval(expr, &scope, ctx)
        }
        LetValue::Query(statement) => {
            let rows = run_nested(statement, ctx, row)?;
            Ok(Value::List(rows.iter().map(row_to_value).collect()))
        }
    }
}

fn describe_lets(lets: &[LetItem]) -> Vec<ExplainProp> {
    let names: Vec<String> = lets.iter().map(|item| format!("${}", item.name)).collect();
    vec![ExplainProp::plain("vars", names.join(", "))]
}

/// Evaluates command-wide LET bindings once, before the input starts.
pub struct GlobalLetStep {
    core: StepCore,
    input: BoxStep,
    lets: Vec<LetItem>,
}

impl GlobalLetStep {
    pub fn new(input: BoxStep, lets: Vec<LetItem>) -> Self {
        Self {
            core: StepCore::new(),
            input,
            lets,
        }
    }
}

impl ExecutionStep for GlobalLetStep {
    fn name(&self) -> &'static str {
        "GlobalLet"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        for item in &self.lets {
            let value = let_value(item, None, ctx)?;
            ctx.set_variable(item.name.clone(), value);
        }
        self.input.start(ctx)
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        self.input.next(ctx)
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn props(&self) -> Vec<ExplainProp> {
        describe_lets(&self.lets)
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// Evaluates row-dependent LET bindings and attaches them as row metadata.
pub struct LetStep {
    core: StepCore,
    input: BoxStep,
    lets: Vec<LetItem>,
}

impl LetStep {
    pub fn new(input: BoxStep, lets: Vec<LetItem>) -> Self {
        Self {
            core: StepCore::new(),
            input,
            lets,
        }
    }
}

impl ExecutionStep for LetStep {
    fn name(&self) -> &'static str {
        "Let"
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
        let Some(mut row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        for item in &self.lets {
            let value = let_value(item, Some(&row), ctx)?;
            row.set_metadata(item.name.clone(), value);
        }
        Ok(Some(row))
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn props(&self) -> Vec<ExplainProp> {
        describe_lets(&self.lets)
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

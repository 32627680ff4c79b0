//! Projection and aggregation.

use std::collections::BTreeMap;

use crate::query::ast::{BinaryOp, Expr, ProjectionItem};
use crate::query::context::CommandContext;
use crate::query::expr::{binary, eval, Scope};
use crate::query::plan::ExplainProp;
use crate::query::row::ResultRow;
use crate::query::step::{BoxStep, ExecutionStep, StepCore};
use crate::query::value::Value;
use crate::types::{PenumbraError, Result};

fn describe_items(items: &[ProjectionItem]) -> String {
    items
        .iter()
        .map(|item| match &item.alias {
            Some(alias) => format!("{} AS {alias}", item.expr),
            None => item.expr.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Evaluates projection items into a fresh, non-element row.
pub struct ProjectionStep {
    core: StepCore,
    input: BoxStep,
    items: Vec<ProjectionItem>,
}

impl ProjectionStep {
    pub fn new(input: BoxStep, items: Vec<ProjectionItem>) -> Self {
        Self {
            core: StepCore::new(),
            input,
            items,
        }
    }
}

impl ExecutionStep for ProjectionStep {
    fn name(&self) -> &'static str {
        "Projection"
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
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let scope = Scope::row(&row);
        let mut out = ResultRow::new();
        for item in &self.items {
            out.set_property(item.output_name(), eval(&item.expr, &scope, ctx)?);
        }
        Ok(Some(out))
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::literal("items", describe_items(&self.items))]
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// Running state of one aggregate function.
#[derive(Clone, Debug)]
enum Accumulator {
    Count(i64),
    Sum(Value),
    Min(Value),
    Max(Value),
    Avg { sum: f64, count: u64 },
}

impl Accumulator {
    fn for_function(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Accumulator::Count(0)),
            "sum" => Some(Accumulator::Sum(Value::Null)),
            "min" => Some(Accumulator::Min(Value::Null)),
            "max" => Some(Accumulator::Max(Value::Null)),
            "avg" => Some(Accumulator::Avg { sum: 0.0, count: 0 }),
            _ => None,
        }
    }

    /// Folds one input; `None` stands for `count(*)`.
    fn add(&mut self, value: Option<Value>) -> Result<()> {
        let value = match value {
            None => {
                if let Accumulator::Count(n) = self {
                    *n += 1;
                }
                return Ok(());
            }
            Some(value) if value.is_null() => return Ok(()),
            Some(value) => value,
        };
        match self {
            Accumulator::Count(n) => *n += 1,
            Accumulator::Sum(total) => {
                *total = if total.is_null() {
                    value
                } else {
                    binary(BinaryOp::Add, total, &value)?
                };
            }
            Accumulator::Min(current) => {
                if current.is_null() || value.total_cmp(current).is_lt() {
                    *current = value;
                }
            }
            Accumulator::Max(current) => {
                if current.is_null() || value.total_cmp(current).is_gt() {
                    *current = value;
                }
            }
            Accumulator::Avg { sum, count } => {
                let number = value.as_f64().ok_or_else(|| {
                    PenumbraError::TypeMismatch(format!("avg() over {}", value.type_name()))
                })?;
                *sum += number;
                *count += 1;
            }
        }
        Ok(())
    }

    fn finish(&self) -> Value {
        match self {
            Accumulator::Count(n) => Value::Int(*n),
            Accumulator::Sum(value) | Accumulator::Min(value) | Accumulator::Max(value) => {
                value.clone()
            }
            Accumulator::Avg { count: 0, .. } => Value::Null,
            Accumulator::Avg { sum, count } => Value::Float(sum / *count as f64),
        }
    }
}

/// Output column of an aggregate projection.
enum AggregateColumn {
    /// Top-level aggregate call and its argument (`None` for `count(*)`).
    Aggregate { arg: Option<Expr> },
    /// Plain expression evaluated on the first row of the group.
    Plain,
}

struct Group {
    first: Option<ResultRow>,
    accumulators: Vec<Option<Accumulator>>,
}

/// Groups input rows and emits one row per group once the input is exhausted.
///
/// Without GROUP BY all rows form a single group, which is emitted even when
/// the input is empty (`count` is 0, other aggregates are null).
pub struct AggregateStep {
    core: StepCore,
    input: BoxStep,
    group_by: Vec<Expr>,
    items: Vec<ProjectionItem>,
    columns: Vec<AggregateColumn>,
    output: Option<std::vec::IntoIter<ResultRow>>,
}

impl AggregateStep {
    /// Fails when an aggregate is nested inside a larger expression.
    pub fn new(input: BoxStep, group_by: Vec<Expr>, items: Vec<ProjectionItem>) -> Result<Self> {
        let columns = items
            .iter()
            .map(|item| match &item.expr {
                Expr::Function { name, args } if Accumulator::for_function(name).is_some() => {
                    if args.len() > 1 {
                        return Err(PenumbraError::CommandExecution(format!(
                            "{name}() takes a single argument"
                        )));
                    }
                    Ok(AggregateColumn::Aggregate {
                        arg: args.first().cloned(),
                    })
                }
                expr if expr.has_aggregate() => Err(PenumbraError::CommandExecution(format!(
                    "aggregate nested inside '{expr}' is not supported"
                ))),
                _ => Ok(AggregateColumn::Plain),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            core: StepCore::new(),
            input,
            group_by,
            items,
            columns,
            output: None,
        })
    }

    fn new_group(&self) -> Group {
        Group {
            first: None,
            accumulators: self
                .items
                .iter()
                .map(|item| match &item.expr {
                    Expr::Function { name, .. } => Accumulator::for_function(name),
                    _ => None,
                })
                .collect(),
        }
    }

    fn aggregate(&mut self, ctx: &mut CommandContext) -> Result<Vec<ResultRow>> {
        let mut order: Vec<Vec<Value>> = Vec::new();
        let mut groups: BTreeMap<Vec<Value>, Group> = BTreeMap::new();
        if self.group_by.is_empty() {
            order.push(Vec::new());
            groups.insert(Vec::new(), self.new_group());
        }
        while let Some(row) = self.input.next(ctx)? {
            let scope = Scope::row(&row);
            let key = self
                .group_by
                .iter()
                .map(|expr| eval(expr, &scope, ctx))
                .collect::<Result<Vec<_>>>()?;
            if !groups.contains_key(&key) {
                let group = self.new_group();
                groups.insert(key.clone(), group);
                order.push(key.clone());
                ctx.ensure_heap("Aggregate", groups.len())?;
            }
            let Some(group) = groups.get_mut(&key) else {
                continue;
            };
            for (column, acc) in self.columns.iter().zip(group.accumulators.iter_mut()) {
                if let (AggregateColumn::Aggregate { arg }, Some(acc)) = (column, acc) {
                    let value = match arg {
                        Some(expr) => Some(eval(expr, &scope, ctx)?),
                        None => None,
                    };
                    acc.add(value)?;
                }
            }
            if group.first.is_none() {
                group.first = Some(row);
            }
        }
        let mut rows = Vec::with_capacity(order.len());
        for key in order {
            let Some(group) = groups.remove(&key) else {
                continue;
            };
            let empty = ResultRow::new();
            let first = group.first.as_ref().unwrap_or(&empty);
            let scope = Scope::row(first);
            let mut out = ResultRow::new();
            for ((item, column), acc) in self
                .items
                .iter()
                .zip(&self.columns)
                .zip(&group.accumulators)
            {
                let value = match (column, acc) {
                    (AggregateColumn::Aggregate { .. }, Some(acc)) => acc.finish(),
                    _ => eval(&item.expr, &scope, ctx)?,
                };
                out.set_property(item.output_name(), value);
            }
            rows.push(out);
        }
        Ok(rows)
    }
}

impl ExecutionStep for AggregateStep {
    fn name(&self) -> &'static str {
        "Aggregate"
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
            let rows = self.aggregate(ctx)?;
            self.output = Some(rows.into_iter());
        }
        Ok(self.output.as_mut().and_then(Iterator::next))
    }

    fn on_close(&mut self) {
        self.input.close();
        self.output = None;
    }

    fn props(&self) -> Vec<ExplainProp> {
        let mut props = vec![ExplainProp::literal("items", describe_items(&self.items))];
        if !self.group_by.is_empty() {
            let keys: Vec<String> = self.group_by.iter().map(ToString::to_string).collect();
            props.push(ExplainProp::literal("group_by", keys.join(", ")));
        }
        props
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

//! Source steps: scans, lookups and nested plans that feed a pipeline.

use std::ops::Bound;

use crate::query::ast::Expr;
use crate::query::context::CommandContext;
use crate::query::expr::{eval, Scope};
use crate::query::gateway::{BoxIdStream, IndexPredicate, ScanOrder};
use crate::query::plan::ExplainProp;
use crate::query::row::ResultRow;
use crate::query::step::{load_row, BoxStep, ExecutionStep, StepCore};
use crate::query::value::Value;
use crate::types::{ClusterId, RecordId, Result};

/// Pulls ids from a gateway stream and fetches their records, skipping ids
/// whose record disappeared since the stream was opened.
fn next_from_stream(
    stream: &mut Option<BoxIdStream>,
    ctx: &CommandContext,
) -> Result<Option<ResultRow>> {
    let Some(ids) = stream.as_mut() else {
        return Ok(None);
    };
    while let Some(id) = ids.next_id()? {
        if let Some(row) = load_row(ctx.gateway(), id)? {
            return Ok(Some(row));
        }
    }
    *stream = None;
    Ok(None)
}

/// Full scan of a class in storage order.
pub struct FetchFromClassStep {
    core: StepCore,
    class: String,
    polymorphic: bool,
    stream: Option<BoxIdStream>,
}

impl FetchFromClassStep {
    pub fn new(class: impl Into<String>, polymorphic: bool) -> Self {
        Self {
            core: StepCore::new(),
            class: class.into(),
            polymorphic,
            stream: None,
        }
    }
}

impl ExecutionStep for FetchFromClassStep {
    fn name(&self) -> &'static str {
        "FetchFromClass"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        self.stream = Some(ctx.gateway().scan_class(&self.class, self.polymorphic)?);
        Ok(())
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        next_from_stream(&mut self.stream, ctx)
    }

    fn on_close(&mut self) {
        self.stream = None;
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![
            ExplainProp::plain("class", self.class.clone()),
            ExplainProp::plain("polymorphic", self.polymorphic.to_string()),
        ]
    }
}

/// Scan of a single cluster.
pub struct FetchFromClusterStep {
    core: StepCore,
    cluster: ClusterId,
    stream: Option<BoxIdStream>,
}

impl FetchFromClusterStep {
    pub fn new(cluster: ClusterId) -> Self {
        Self {
            core: StepCore::new(),
            cluster,
            stream: None,
        }
    }
}

impl ExecutionStep for FetchFromClusterStep {
    fn name(&self) -> &'static str {
        "FetchFromCluster"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        self.stream = Some(ctx.gateway().scan_cluster(self.cluster)?);
        Ok(())
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        next_from_stream(&mut self.stream, ctx)
    }

    fn on_close(&mut self) {
        self.stream = None;
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("cluster", self.cluster.to_string())]
    }
}

/// Fetches an explicit list of records, in list order.
pub struct FetchFromRidsStep {
    core: StepCore,
    rids: Vec<RecordId>,
    pos: usize,
}

impl FetchFromRidsStep {
    pub fn new(rids: Vec<RecordId>) -> Self {
        Self {
            core: StepCore::new(),
            rids,
            pos: 0,
        }
    }
}

impl ExecutionStep for FetchFromRidsStep {
    fn name(&self) -> &'static str {
        "FetchFromRids"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, _ctx: &mut CommandContext) -> Result<()> {
        Ok(())
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        while let Some(rid) = self.rids.get(self.pos).copied() {
            self.pos += 1;
            if let Some(row) = load_row(ctx.gateway(), rid)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn on_close(&mut self) {}

    fn props(&self) -> Vec<ExplainProp> {
        let rids: Vec<String> = self.rids.iter().map(ToString::to_string).collect();
        vec![ExplainProp::literal("rids", rids.join(", "))]
    }
}

/// Index key condition whose operands are evaluated when the lookup opens,
/// so parameters are bound per execution.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexKey {
    Equals(Vec<Expr>),
    Prefix(Vec<Expr>),
    Range {
        prefix: Vec<Expr>,
        lower: Bound<Expr>,
        upper: Bound<Expr>,
    },
    ContainsAny(Expr),
    ContainsKey(Expr),
    ContainsValue(Expr),
    /// Every key, in key order.
    All,
}

impl IndexKey {
    /// Resolves operands; `None` when a null operand makes the lookup empty.
    fn resolve(&self, ctx: &CommandContext) -> Result<Option<IndexPredicate>> {
        let scope = Scope::empty();
        let values = |exprs: &[Expr]| -> Result<Option<Vec<Value>>> {
            let values = exprs
                .iter()
                .map(|expr| eval(expr, &scope, ctx))
                .collect::<Result<Vec<_>>>()?;
            Ok((!values.iter().any(Value::is_null)).then_some(values))
        };
        let bound = |bound: &Bound<Expr>| -> Result<Option<Bound<Value>>> {
            Ok(match bound {
                Bound::Unbounded => Some(Bound::Unbounded),
                Bound::Included(expr) => {
                    let value = eval(expr, &scope, ctx)?;
                    (!value.is_null()).then_some(Bound::Included(value))
                }
                Bound::Excluded(expr) => {
                    let value = eval(expr, &scope, ctx)?;
                    (!value.is_null()).then_some(Bound::Excluded(value))
                }
            })
        };
        let single = |expr: &Expr| -> Result<Option<Value>> {
            let value = eval(expr, &scope, ctx)?;
            Ok((!value.is_null()).then_some(value))
        };
        Ok(match self {
            IndexKey::Equals(exprs) => values(exprs)?.map(IndexPredicate::Equals),
            IndexKey::Prefix(exprs) => values(exprs)?.map(IndexPredicate::Prefix),
            IndexKey::Range {
                prefix,
                lower,
                upper,
            } => match (values(prefix)?, bound(lower)?, bound(upper)?) {
                (Some(prefix), Some(lower), Some(upper)) => Some(IndexPredicate::Range {
                    prefix,
                    lower,
                    upper,
                }),
                _ => None,
            },
            IndexKey::ContainsAny(expr) => {
                let keys: Vec<Value> = eval(expr, &scope, ctx)?
                    .elements()
                    .into_iter()
                    .filter(|value| !value.is_null())
                    .cloned()
                    .collect();
                Some(IndexPredicate::ContainsAny(keys))
            }
            IndexKey::ContainsKey(expr) => single(expr)?.map(IndexPredicate::ContainsKey),
            IndexKey::ContainsValue(expr) => single(expr)?.map(IndexPredicate::ContainsValue),
            IndexKey::All => Some(IndexPredicate::all()),
        })
    }

    fn describe(&self) -> String {
        let join = |exprs: &[Expr]| {
            exprs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let bound = |bound: &Bound<Expr>, open: &str, closed: &str| match bound {
            Bound::Unbounded => "*".to_owned(),
            Bound::Included(expr) => format!("{closed}{expr}"),
            Bound::Excluded(expr) => format!("{open}{expr}"),
        };
        match self {
            IndexKey::Equals(exprs) => format!("equals [{}]", join(exprs)),
            IndexKey::Prefix(exprs) => format!("prefix [{}]", join(exprs)),
            IndexKey::Range {
                prefix,
                lower,
                upper,
            } => format!(
                "range [{}] {} .. {}",
                join(prefix),
                bound(lower, ">", ">="),
                bound(upper, "<", "<=")
            ),
            IndexKey::ContainsAny(expr) => format!("containsAny {expr}"),
            IndexKey::ContainsKey(expr) => format!("containsKey {expr}"),
            IndexKey::ContainsValue(expr) => format!("containsValue {expr}"),
            IndexKey::All => "all".to_owned(),
        }
    }
}

/// Index lookup; rows come back in index key order.
pub struct FetchFromIndexStep {
    core: StepCore,
    index: String,
    key: IndexKey,
    order: ScanOrder,
    stream: Option<BoxIdStream>,
}

impl FetchFromIndexStep {
    pub fn new(index: impl Into<String>, key: IndexKey, order: ScanOrder) -> Self {
        Self {
            core: StepCore::new(),
            index: index.into(),
            key,
            order,
            stream: None,
        }
    }
}

impl ExecutionStep for FetchFromIndexStep {
    fn name(&self) -> &'static str {
        "FetchFromIndex"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        self.stream = match self.key.resolve(ctx)? {
            Some(predicate) => Some(ctx.gateway().lookup_index(
                &self.index,
                &predicate,
                self.order,
            )?),
            None => None,
        };
        Ok(())
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        next_from_stream(&mut self.stream, ctx)
    }

    fn on_close(&mut self) {
        self.stream = None;
    }

    fn props(&self) -> Vec<ExplainProp> {
        let order = match self.order {
            ScanOrder::Ascending => "asc",
            ScanOrder::Descending => "desc",
        };
        vec![
            ExplainProp::plain("index", self.index.clone()),
            ExplainProp::literal("key", self.key.describe()),
            ExplainProp::plain("order", order),
        ]
    }
}

/// Produces nothing; used when the planner proves the result empty.
pub struct EmptyStep {
    core: StepCore,
    reason: &'static str,
}

impl EmptyStep {
    pub fn new(reason: &'static str) -> Self {
        Self {
            core: StepCore::new(),
            reason,
        }
    }
}

impl ExecutionStep for EmptyStep {
    fn name(&self) -> &'static str {
        "Empty"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, _ctx: &mut CommandContext) -> Result<()> {
        Ok(())
    }

    fn produce(&mut self, _ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        Ok(None)
    }

    fn on_close(&mut self) {}

    fn props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("reason", self.reason)]
    }
}

/// Single empty row, the source of target-less SELECTs.
pub struct NoTargetStep {
    core: StepCore,
    emitted: bool,
}

impl NoTargetStep {
    pub fn new() -> Self {
        Self {
            core: StepCore::new(),
            emitted: false,
        }
    }
}

impl Default for NoTargetStep {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStep for NoTargetStep {
    fn name(&self) -> &'static str {
        "NoTarget"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, _ctx: &mut CommandContext) -> Result<()> {
        Ok(())
    }

    fn produce(&mut self, _ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        if self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        Ok(Some(ResultRow::new()))
    }

    fn on_close(&mut self) {}
}

/// Runs a nested plan in its own variable scope and streams its rows.
pub struct SubQueryStep {
    core: StepCore,
    plan: BoxStep,
    scope: Option<CommandContext>,
}

impl SubQueryStep {
    pub fn new(plan: BoxStep) -> Self {
        Self {
            core: StepCore::new(),
            plan,
            scope: None,
        }
    }
}

impl ExecutionStep for SubQueryStep {
    fn name(&self) -> &'static str {
        "SubQuery"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        let scope = self.scope.insert(ctx.child());
        self.plan.start(scope)
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        match self.scope.as_mut() {
            Some(scope) => self.plan.next(scope),
            None => self.plan.next(ctx),
        }
    }

    fn on_close(&mut self) {
        self.plan.close();
        self.scope = None;
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.plan.as_ref()]
    }
}

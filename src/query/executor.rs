//! Command execution entry point and the caller-facing result stream.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use crate::query::ast::Statement;
use crate::query::context::{CommandContext, ExecutionConfig, Params};
use crate::query::expr::row_to_value;
use crate::query::gateway::Gateway;
use crate::query::plan::{ExecutionPlan, PlanExplain};
use crate::query::planner::Planner;
use crate::query::profile::PlanProfile;
use crate::query::row::ResultRow;
use crate::types::{PenumbraError, Result};

/// Pull-based handle over the rows of one command.
///
/// Rows are computed on demand: `has_next` pulls at most one row ahead and
/// `next` hands it out. Errors surface from the call that triggered them;
/// rows consumed before an error stay valid and the stream remains closable.
/// Dropping the stream closes it.
pub struct ResultStream {
    plan: ExecutionPlan,
    ctx: CommandContext,
    peeked: Option<ResultRow>,
    exhausted: bool,
    closed: bool,
}

impl ResultStream {
    fn new(plan: ExecutionPlan, ctx: CommandContext) -> Self {
        Self {
            plan,
            ctx,
            peeked: None,
            exhausted: false,
            closed: false,
        }
    }

    /// True when another row is available. Pulls from the plan if needed.
    pub fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        if self.exhausted || self.closed {
            return Ok(false);
        }
        match self.plan.next(&mut self.ctx) {
            Ok(Some(row)) => {
                self.peeked = Some(row);
                Ok(true)
            }
            Ok(None) => {
                self.exhausted = true;
                self.plan.close();
                Ok(false)
            }
            Err(err) => {
                self.exhausted = true;
                tracing::debug!(code = err.code(), error = %err, "command failed mid-stream");
                Err(err)
            }
        }
    }

    /// Next row; fails with `NoSuchElement` once the stream is exhausted.
    pub fn next(&mut self) -> Result<ResultRow> {
        if !self.has_next()? {
            return Err(PenumbraError::NoSuchElement);
        }
        self.peeked.take().ok_or(PenumbraError::NoSuchElement)
    }

    /// Releases every cursor held by the plan. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.peeked = None;
        self.plan.close();
        tracing::trace!(statement = self.plan.statement(), "result stream closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Step tree of the running plan.
    pub fn explain(&self) -> PlanExplain {
        self.plan.explain()
    }

    /// Per-step counters, populated when profiling is enabled.
    pub fn profile(&self) -> PlanProfile {
        self.plan.profile()
    }

    /// Iterator adapter over the remaining rows.
    pub fn rows(&mut self) -> impl Iterator<Item = Result<ResultRow>> + '_ {
        std::iter::from_fn(move || match self.has_next() {
            Ok(true) => Some(self.next()),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        })
    }

    /// Drains the remaining rows and closes the stream.
    pub fn collect_rows(mut self) -> Result<Vec<ResultRow>> {
        let rows = self.rows().collect::<Result<Vec<_>>>();
        self.close();
        rows
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn statement_timeout(statement: &Statement) -> Option<Duration> {
    match statement {
        Statement::Select(select) => select.timeout,
        Statement::Match(statement) => statement.timeout,
        Statement::Update(update) => update.timeout,
        Statement::Delete(delete) => delete.timeout,
        Statement::Insert(_) | Statement::CreateEdge(_) => None,
    }
}

/// Plans and runs commands against a gateway.
///
/// Mutating commands require a transaction opened on the gateway by the
/// caller; the executor never begins or commits one itself.
pub struct Executor {
    gateway: Arc<dyn Gateway>,
    config: ExecutionConfig,
}

impl Executor {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            config: ExecutionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    fn planner(&self) -> Planner<'_> {
        Planner::new(self.config.planner.clone(), &*self.gateway)
    }

    /// Plans a statement without running it.
    pub fn explain(&self, statement: &Statement) -> Result<PlanExplain> {
        Ok(self.planner().plan(statement)?.explain())
    }

    /// Plans and starts a statement.
    pub fn execute(&self, statement: &Statement, params: Params) -> Result<ResultStream> {
        self.run(statement, params, None)
    }

    /// Like [`Executor::execute`]; setting `cancel` aborts the command at
    /// the next row boundary.
    pub fn execute_with_cancel(
        &self,
        statement: &Statement,
        params: Params,
        cancel: Arc<AtomicBool>,
    ) -> Result<ResultStream> {
        self.run(statement, params, Some(cancel))
    }

    fn run(
        &self,
        statement: &Statement,
        params: Params,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<ResultStream> {
        let mut ctx = CommandContext::new(Arc::clone(&self.gateway), params, self.config.clone());
        if let Some(token) = cancel {
            ctx = ctx.with_cancel_token(token);
        }
        if let Some(timeout) = statement_timeout(statement) {
            ctx.set_timeout(timeout);
        }
        let mut plan = self.planner().plan(statement)?;
        if let Err(err) = plan.start(&mut ctx) {
            plan.close();
            return Err(err);
        }
        tracing::debug!(statement = statement.kind_name(), "command started");
        Ok(ResultStream::new(plan, ctx))
    }
}

/// Runs a nested statement to completion in a child scope; `$parent` is
/// bound to the enclosing row when there is one.
pub(crate) fn run_nested(
    statement: &Statement,
    ctx: &CommandContext,
    parent: Option<&ResultRow>,
) -> Result<Vec<ResultRow>> {
    let mut scope = ctx.child();
    if let Some(row) = parent {
        scope.set_variable("parent", row_to_value(row));
    }
    let root = Planner::new(ctx.config().planner.clone(), ctx.gateway()).plan_step(statement)?;
    let mut plan = ExecutionPlan::new(root, statement.kind_name());
    let collected = (|| -> Result<Vec<ResultRow>> {
        plan.start(&mut scope)?;
        let mut rows = Vec::new();
        while let Some(row) = plan.next(&mut scope)? {
            rows.push(row);
            scope.ensure_heap("SubQuery", rows.len())?;
        }
        Ok(rows)
    })();
    plan.close();
    collected
}

#![forbid(unsafe_code)]

//! Pull-based execution steps.
//!
//! Every operator implements [`ExecutionStep`]. Steps compose by ownership:
//! a step owns its upstream step(s) and pulls rows from them on demand, so a
//! plan is a tree rooted at the step the result stream reads from. The
//! lifecycle (`start` once, `next` until `None`, `close` any number of times)
//! is enforced by the provided trait methods on top of [`StepCore`].

use crate::query::context::CommandContext;
use crate::query::gateway::Gateway;
use crate::query::plan::{ExplainNode, ExplainProp};
use crate::query::profile::{profile_timer, StepProfile};
use crate::query::row::ResultRow;
use crate::types::{PenumbraError, RecordId, Result};

mod check;
mod dml;
mod filter;
mod order;
mod parallel;
mod project;
mod source;

pub use check::{CheckRecordTypeStep, CheckSafeDeleteStep};
pub use dml::{
    CountStep, CreateEdgesStep, DeleteStep, InsertFromQueryStep, InsertValuesStep, UpdateStep,
    UpsertStep,
};
pub use filter::{FilterStep, GlobalLetStep, LetStep};
pub use order::{DistinctStep, LimitStep, OrderByStep, SkipStep};
pub use parallel::ParallelExecStep;
pub use project::{AggregateStep, ProjectionStep};
pub use source::{
    EmptyStep, FetchFromClassStep, FetchFromClusterStep, FetchFromIndexStep, FetchFromRidsStep,
    IndexKey, NoTargetStep, SubQueryStep,
};

/// Boxed step, the unit plans are built from.
pub type BoxStep = Box<dyn ExecutionStep>;

/// Lifecycle state of a step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StepState {
    #[default]
    Created,
    Open,
    Exhausted,
    Closed,
}

/// Lifecycle and profiling bookkeeping embedded in every step.
#[derive(Debug, Default)]
pub struct StepCore {
    state: StepState,
    profiling: bool,
    profile: StepProfile,
}

impl StepCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn profile(&self) -> Option<&StepProfile> {
        self.profiling.then_some(&self.profile)
    }

    fn begin(&mut self, profiling: bool) -> Result<()> {
        if self.state != StepState::Created {
            return Err(PenumbraError::Invalid("execution step started twice"));
        }
        self.state = StepState::Open;
        self.profiling = profiling;
        Ok(())
    }
}

/// A pull-based operator.
///
/// Implementors provide `on_start`, `produce` and `on_close`; callers use
/// `start`, `next` and `close`, which enforce the lifecycle:
/// - `start` fails when called twice;
/// - `next` fails before `start`, and returns `None` forever once the step
///   is exhausted or closed;
/// - `close` is idempotent and releases upstream steps.
pub trait ExecutionStep {
    /// Operator name shown in plan descriptions.
    fn name(&self) -> &'static str;
    fn core(&self) -> &StepCore;
    fn core_mut(&mut self) -> &mut StepCore;
    /// Opens upstream steps and acquires cursors.
    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()>;
    /// Produces the next row, pulling from upstream as needed.
    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>>;
    /// Releases cursors and closes upstream steps.
    fn on_close(&mut self);

    /// Operator parameters for plan descriptions.
    fn props(&self) -> Vec<ExplainProp> {
        Vec::new()
    }

    /// Upstream steps, for plan descriptions.
    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        Vec::new()
    }

    fn start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        let name = self.name();
        self.core_mut().begin(ctx.config().profiling)?;
        tracing::trace!(step = name, "start");
        self.on_start(ctx)
    }

    fn next(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        match self.core().state {
            StepState::Created => {
                return Err(PenumbraError::Invalid("execution step pulled before start"))
            }
            StepState::Exhausted | StepState::Closed => return Ok(None),
            StepState::Open => {}
        }
        ctx.check_interrupt()?;
        let timer = profile_timer(self.core().profiling);
        let row = self.produce(ctx)?;
        let core = self.core_mut();
        core.profile.record(timer, row.is_some());
        if row.is_none() {
            core.state = StepState::Exhausted;
        }
        Ok(row)
    }

    fn close(&mut self) {
        if self.core().state == StepState::Closed {
            return;
        }
        tracing::trace!(step = self.name(), "close");
        self.core_mut().state = StepState::Closed;
        self.on_close();
    }

    /// Describes this step and its inputs.
    fn explain(&self) -> ExplainNode {
        let mut node = ExplainNode::new(self.name());
        node.props = self.props();
        if let Some(profile) = self.core().profile() {
            node.props.push(ExplainProp::plain("rows", profile.rows.to_string()));
            node.props.push(ExplainProp::plain("cost_ns", profile.nanos.to_string()));
        }
        node.inputs = self.inputs().into_iter().map(|input| input.explain()).collect();
        node
    }
}

/// Fetches a record as an element row; `None` when it no longer exists.
pub(crate) fn load_row(gateway: &dyn Gateway, id: RecordId) -> Result<Option<ResultRow>> {
    Ok(gateway.fetch(id)?.map(ResultRow::from_record))
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory row source for step unit tests.

    use super::*;

    pub struct RowsStep {
        core: StepCore,
        rows: std::vec::IntoIter<ResultRow>,
    }

    impl RowsStep {
        pub fn boxed(rows: Vec<ResultRow>) -> BoxStep {
            Box::new(Self {
                core: StepCore::new(),
                rows: rows.into_iter(),
            })
        }
    }

    impl ExecutionStep for RowsStep {
        fn name(&self) -> &'static str {
            "Rows"
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
            Ok(self.rows.next())
        }
        fn on_close(&mut self) {}
    }

    /// Starts a step and drains it.
    pub fn drain(step: &mut BoxStep, ctx: &mut CommandContext) -> Result<Vec<ResultRow>> {
        step.start(ctx)?;
        let mut out = Vec::new();
        while let Some(row) = step.next(ctx)? {
            out.push(row);
        }
        step.close();
        Ok(out)
    }
}

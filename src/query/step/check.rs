//! Record type guards placed in front of mutations.

use crate::query::context::CommandContext;
use crate::query::metadata::{EDGE_CLASS, VERTEX_CLASS};
use crate::query::plan::ExplainProp;
use crate::query::row::ResultRow;
use crate::query::step::{BoxStep, ExecutionStep, StepCore};
use crate::types::{PenumbraError, Result};

/// Fails on the first row whose class is not `class` or a subclass of it.
pub struct CheckRecordTypeStep {
    core: StepCore,
    input: BoxStep,
    class: String,
}

impl CheckRecordTypeStep {
    pub fn new(input: BoxStep, class: impl Into<String>) -> Self {
        Self {
            core: StepCore::new(),
            input,
            class: class.into(),
        }
    }
}

impl ExecutionStep for CheckRecordTypeStep {
    fn name(&self) -> &'static str {
        "CheckRecordType"
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
        let matches = match row.class_name() {
            Some(class) => ctx.gateway().is_subclass_of(class, &self.class)?,
            None => false,
        };
        if !matches {
            return Err(mismatch(&row, &self.class));
        }
        Ok(Some(row))
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("class", self.class.clone())]
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// Rejects vertices and edges in a plain DELETE, which would leave dangling
/// adjacency behind.
pub struct CheckSafeDeleteStep {
    core: StepCore,
    input: BoxStep,
}

impl CheckSafeDeleteStep {
    pub fn new(input: BoxStep) -> Self {
        Self {
            core: StepCore::new(),
            input,
        }
    }
}

impl ExecutionStep for CheckSafeDeleteStep {
    fn name(&self) -> &'static str {
        "CheckSafeDelete"
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
        if let Some(class) = row.class_name() {
            let gateway = ctx.gateway();
            for graph_class in [VERTEX_CLASS, EDGE_CLASS] {
                if gateway.is_subclass_of(class, graph_class)? {
                    return Err(mismatch(&row, "a non-graph class (use DELETE VERTEX/EDGE or UNSAFE)"));
                }
            }
        }
        Ok(Some(row))
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

fn mismatch(row: &ResultRow, expected: &str) -> PenumbraError {
    match row.identity() {
        Some(rid) => PenumbraError::RecordTypeMismatch {
            rid,
            expected: expected.to_owned(),
        },
        None => PenumbraError::CommandExecution(format!(
            "expected a record of {expected}, got a projection row"
        )),
    }
}

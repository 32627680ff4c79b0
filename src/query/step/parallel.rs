use crate::query::context::CommandContext;
use crate::query::plan::ExplainProp;
use crate::query::row::ResultRow;
use crate::query::step::{BoxStep, ExecutionStep, StepCore};
use crate::types::Result;

/// Concatenates the output of several branches, in order.
///
/// Each branch is started only when the previous one is exhausted and is
/// closed as soon as it runs dry. Rows are not de-duplicated; a DISTINCT
/// downstream is responsible for that.
pub struct ParallelExecStep {
    core: StepCore,
    branches: Vec<BoxStep>,
    current: usize,
    started: bool,
}

impl ParallelExecStep {
    pub fn new(branches: Vec<BoxStep>) -> Self {
        Self {
            core: StepCore::new(),
            branches,
            current: 0,
            started: false,
        }
    }
}

impl ExecutionStep for ParallelExecStep {
    fn name(&self) -> &'static str {
        "ParallelExec"
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
        while let Some(branch) = self.branches.get_mut(self.current) {
            if !self.started {
                branch.start(ctx)?;
                self.started = true;
            }
            if let Some(row) = branch.next(ctx)? {
                return Ok(Some(row));
            }
            branch.close();
            self.current += 1;
            self.started = false;
        }
        Ok(None)
    }

    fn on_close(&mut self) {
        for branch in &mut self.branches {
            branch.close();
        }
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![ExplainProp::plain("branches", self.branches.len().to_string())]
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        self.branches.iter().map(|branch| branch.as_ref()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::query::step::testing::{drain, RowsStep};
    use crate::query::value::Value;
    use crate::storage::MemoryStore;

    #[test]
    fn branches_are_concatenated_without_dedup() -> Result<()> {
        let mut ctx =
            CommandContext::new(Arc::new(MemoryStore::new()), Default::default(), Default::default());
        let row = |n: i64| ResultRow::from_props([("n", Value::Int(n))]);
        let mut step: BoxStep = Box::new(ParallelExecStep::new(vec![
            RowsStep::boxed(vec![row(1), row(2)]),
            RowsStep::boxed(vec![]),
            RowsStep::boxed(vec![row(2), row(3)]),
        ]));
        let rows = drain(&mut step, &mut ctx)?;
        let numbers: Vec<i64> = rows
            .iter()
            .filter_map(|row| row.property("n").and_then(Value::as_i64))
            .collect();
        assert_eq!(numbers, vec![1, 2, 2, 3]);
        assert_eq!(step.explain().inputs.len(), 3);
        Ok(())
    }
}

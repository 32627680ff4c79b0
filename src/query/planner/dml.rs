//! INSERT, UPDATE, DELETE and CREATE EDGE planning.

use crate::query::ast::{
    CreateEdgeStatement, DeleteKind, DeleteStatement, Expr, InsertSource, InsertStatement,
    UpdateReturn, UpdateStatement,
};
use crate::query::metadata::{EDGE_CLASS, VERTEX_CLASS};
use crate::query::planner::Planner;
use crate::query::step::{
    BoxStep, CheckRecordTypeStep, CheckSafeDeleteStep, CountStep, CreateEdgesStep, DeleteStep,
    InsertFromQueryStep, InsertValuesStep, LimitStep, SubQueryStep, UpdateStep, UpsertStep,
};
use crate::types::{PenumbraError, Result};

impl Planner<'_> {
    pub(crate) fn plan_insert(&self, insert: &InsertStatement) -> Result<BoxStep> {
        self.gateway.require_class(&insert.class)?;
        match &insert.source {
            InsertSource::Values { fields, rows } => {
                let rows = rows
                    .iter()
                    .map(|values| {
                        if values.len() != fields.len() {
                            return Err(PenumbraError::CommandExecution(format!(
                                "INSERT row has {} values for {} fields",
                                values.len(),
                                fields.len()
                            )));
                        }
                        Ok(fields.iter().cloned().zip(values.iter().cloned()).collect())
                    })
                    .collect::<Result<Vec<Vec<(String, Expr)>>>>()?;
                Ok(Box::new(InsertValuesStep::new(insert.class.clone(), rows)))
            }
            InsertSource::Set(assignments) => Ok(Box::new(InsertValuesStep::new(
                insert.class.clone(),
                vec![assignments.clone()],
            ))),
            InsertSource::Query(statement) => {
                let input: BoxStep = Box::new(SubQueryStep::new(self.plan_step(statement)?));
                Ok(Box::new(InsertFromQueryStep::new(input, insert.class.clone())))
            }
        }
    }

    pub(crate) fn plan_update(&self, update: &UpdateStatement) -> Result<BoxStep> {
        let mut step = self
            .plan_source(&update.target, update.where_clause.as_ref(), None)?
            .filtered();
        if let Some(limit) = &update.limit {
            step = Box::new(LimitStep::new(step, limit.clone()));
        }
        if update.upsert {
            let class = update.target.class_name().ok_or_else(|| {
                PenumbraError::CommandExecution("UPSERT requires a class target".into())
            })?;
            step = Box::new(UpsertStep::new(step, class, update.where_clause.clone()));
        }
        step = Box::new(UpdateStep::new(
            step,
            update.operations.clone(),
            update.returning,
        ));
        if update.returning == UpdateReturn::Count {
            step = Box::new(CountStep::new(step));
        }
        Ok(step)
    }

    pub(crate) fn plan_delete(&self, delete: &DeleteStatement) -> Result<BoxStep> {
        let mut step = self
            .plan_source(&delete.target, delete.where_clause.as_ref(), None)?
            .filtered();
        step = match delete.kind {
            DeleteKind::Vertex => Box::new(CheckRecordTypeStep::new(step, VERTEX_CLASS)),
            DeleteKind::Edge => Box::new(CheckRecordTypeStep::new(step, EDGE_CLASS)),
            DeleteKind::Record if !delete.unsafe_delete => Box::new(CheckSafeDeleteStep::new(step)),
            DeleteKind::Record => step,
        };
        if let Some(limit) = &delete.limit {
            step = Box::new(LimitStep::new(step, limit.clone()));
        }
        step = Box::new(DeleteStep::new(step));
        if !delete.return_before {
            step = Box::new(CountStep::new(step));
        }
        Ok(step)
    }

    pub(crate) fn plan_create_edge(&self, create: &CreateEdgeStatement) -> Result<BoxStep> {
        self.gateway.require_class(&create.class)?;
        Ok(Box::new(CreateEdgesStep::new(
            create.class.clone(),
            create.from.clone(),
            create.to.clone(),
            create.set.clone(),
            create.upsert,
        )))
    }
}

//! Rule-based planner: turns a command tree into a tree of execution steps.
//!
//! Planning only reads schema metadata (classes, indexes, class counts); it
//! never fetches records, so every planning error surfaces before any I/O.

mod dml;
mod index;
mod select;

use crate::query::ast::Statement;
use crate::query::gateway::Gateway;
use crate::query::pattern;
use crate::query::plan::ExecutionPlan;
use crate::query::step::BoxStep;
use crate::types::Result;

pub(crate) use index::{choose_index, order_index, IndexChoice};
pub(crate) use select::{ClassPlan, Tail};

/// Planner inputs that influence rule selection.
#[derive(Clone, Debug)]
pub struct PlannerConfig {
    /// Replace class scans by index lookups when WHERE terms allow it.
    pub enable_index_selection: bool,
    /// Drop the explicit sort when an index already yields the requested order.
    pub enable_order_elimination: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enable_index_selection: true,
            enable_order_elimination: true,
        }
    }
}

/// Query planner that converts command trees to execution plans.
pub struct Planner<'a> {
    gateway: &'a dyn Gateway,
    config: PlannerConfig,
}

impl<'a> Planner<'a> {
    /// Creates a planner reading schema metadata through `gateway`.
    pub fn new(config: PlannerConfig, gateway: &'a dyn Gateway) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub(crate) fn gateway(&self) -> &'a dyn Gateway {
        self.gateway
    }

    /// Plans a statement.
    pub fn plan(&self, statement: &Statement) -> Result<ExecutionPlan> {
        let root = self.plan_step(statement)?;
        let plan = ExecutionPlan::new(root, statement.kind_name());
        if tracing::enabled!(tracing::Level::DEBUG) {
            let explain = plan.explain();
            tracing::debug!(
                statement = statement.kind_name(),
                plan_hash = explain.plan_hash,
                steps = ?explain.step_names(),
                "planned command"
            );
        }
        Ok(plan)
    }

    /// Plans a statement and returns its root step, for nesting.
    pub(crate) fn plan_step(&self, statement: &Statement) -> Result<BoxStep> {
        match statement {
            Statement::Select(select) => self.plan_select(select),
            Statement::Match(statement) => pattern::plan_match(self, statement),
            Statement::Insert(insert) => self.plan_insert(insert),
            Statement::Update(update) => self.plan_update(update),
            Statement::Delete(delete) => self.plan_delete(delete),
            Statement::CreateEdge(create) => self.plan_create_edge(create),
        }
    }
}

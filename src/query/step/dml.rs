//! Mutation steps. Every one of them refuses to run outside a transaction
//! opened by the caller; commit and rollback stay with the caller too.

use std::collections::VecDeque;

use crate::query::ast::{BinaryOp, EdgeEndpoint, Expr, UpdateOperation, UpdateReturn};
use crate::query::context::CommandContext;
use crate::query::executor::run_nested;
use crate::query::expr::{binary, eval, Scope};
use crate::query::gateway::{Gateway, IndexPredicate, Record, ScanOrder};
use crate::query::metadata::{IndexDef, EDGE_CLASS};
use crate::query::plan::ExplainProp;
use crate::query::row::ResultRow;
use crate::query::step::{load_row, BoxStep, ExecutionStep, StepCore};
use crate::query::value::Value;
use crate::types::{PenumbraError, RecordId, Result};

/// Saves a record and reads it back, so the emitted row carries the stored
/// identity and version.
fn save_and_load(gateway: &dyn Gateway, record: Record) -> Result<ResultRow> {
    let id = gateway.save(record)?;
    load_row(gateway, id)?.ok_or_else(|| PenumbraError::NotFound(format!("record {id}")))
}

/// `INSERT ... VALUES` / `INSERT ... SET`: one new record per value row.
pub struct InsertValuesStep {
    core: StepCore,
    class: String,
    rows: VecDeque<Vec<(String, Expr)>>,
}

impl InsertValuesStep {
    pub fn new(class: impl Into<String>, rows: Vec<Vec<(String, Expr)>>) -> Self {
        Self {
            core: StepCore::new(),
            class: class.into(),
            rows: rows.into(),
        }
    }
}

impl ExecutionStep for InsertValuesStep {
    fn name(&self) -> &'static str {
        "InsertValues"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        ctx.require_transaction("INSERT")
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        let Some(assignments) = self.rows.pop_front() else {
            return Ok(None);
        };
        let mut record = Record::new(self.class.clone());
        for (field, expr) in &assignments {
            record
                .props
                .insert(field.clone(), eval(expr, &Scope::empty(), ctx)?);
        }
        save_and_load(ctx.gateway(), record).map(Some)
    }

    fn on_close(&mut self) {
        self.rows.clear();
    }

    fn props(&self) -> Vec<ExplainProp> {
        vec![
            ExplainProp::plain("class", self.class.clone()),
            ExplainProp::plain("rows", self.rows.len().to_string()),
        ]
    }
}

/// `INSERT ... FROM (SELECT ...)`: copies the properties of each input row.
pub struct InsertFromQueryStep {
    core: StepCore,
    input: BoxStep,
    class: String,
}

impl InsertFromQueryStep {
    pub fn new(input: BoxStep, class: impl Into<String>) -> Self {
        Self {
            core: StepCore::new(),
            input,
            class: class.into(),
        }
    }
}

impl ExecutionStep for InsertFromQueryStep {
    fn name(&self) -> &'static str {
        "InsertFromQuery"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        ctx.require_transaction("INSERT")?;
        self.input.start(ctx)
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let mut record = Record::new(self.class.clone());
        record.props = row.properties().clone();
        save_and_load(ctx.gateway(), record).map(Some)
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

/// Applies SET / INCREMENT / REMOVE to each input record and saves it.
///
/// Saving checks the version the row was read with, so a record changed
/// underneath the command fails with `ConcurrentModification`.
pub struct UpdateStep {
    core: StepCore,
    input: BoxStep,
    operations: Vec<UpdateOperation>,
    returning: UpdateReturn,
}

impl UpdateStep {
    pub fn new(input: BoxStep, operations: Vec<UpdateOperation>, returning: UpdateReturn) -> Self {
        Self {
            core: StepCore::new(),
            input,
            operations,
            returning,
        }
    }

    fn apply(&self, row: &ResultRow, ctx: &CommandContext) -> Result<Record> {
        let mut record = row.to_record()?;
        let scope = Scope::row(row);
        for operation in &self.operations {
            match operation {
                UpdateOperation::Set(field, expr) => {
                    record.props.insert(field.clone(), eval(expr, &scope, ctx)?);
                }
                UpdateOperation::Increment(field, expr) => {
                    let delta = eval(expr, &scope, ctx)?;
                    let current = record.props.get(field).cloned().unwrap_or(Value::Null);
                    let next = if current.is_null() {
                        delta
                    } else {
                        binary(BinaryOp::Add, &current, &delta)?
                    };
                    record.props.insert(field.clone(), next);
                }
                UpdateOperation::Remove(field) => {
                    record.props.remove(field);
                }
            }
        }
        Ok(record)
    }
}

impl ExecutionStep for UpdateStep {
    fn name(&self) -> &'static str {
        "Update"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        ctx.require_transaction("UPDATE")?;
        self.input.start(ctx)
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let record = self.apply(&row, ctx)?;
        let after = save_and_load(ctx.gateway(), record)?;
        Ok(Some(match self.returning {
            UpdateReturn::Before => row,
            UpdateReturn::After | UpdateReturn::Count => after,
        }))
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn props(&self) -> Vec<ExplainProp> {
        let ops: Vec<String> = self
            .operations
            .iter()
            .map(|op| match op {
                UpdateOperation::Set(field, expr) => format!("{field} = {expr}"),
                UpdateOperation::Increment(field, expr) => format!("{field} += {expr}"),
                UpdateOperation::Remove(field) => format!("REMOVE {field}"),
            })
            .collect();
        vec![ExplainProp::literal("operations", ops.join(", "))]
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// Deletes each input record and emits it as it was before deletion.
pub struct DeleteStep {
    core: StepCore,
    input: BoxStep,
}

impl DeleteStep {
    pub fn new(input: BoxStep) -> Self {
        Self {
            core: StepCore::new(),
            input,
        }
    }
}

impl ExecutionStep for DeleteStep {
    fn name(&self) -> &'static str {
        "Delete"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        ctx.require_transaction("DELETE")?;
        self.input.start(ctx)
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        let Some(row) = self.input.next(ctx)? else {
            return Ok(None);
        };
        let id = row.identity().ok_or_else(|| {
            PenumbraError::CommandExecution("cannot delete a projection row".into())
        })?;
        ctx.gateway().delete(id)?;
        Ok(Some(row))
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// Drains its input and emits a single `{count: n}` row.
pub struct CountStep {
    core: StepCore,
    input: BoxStep,
    done: bool,
}

impl CountStep {
    pub fn new(input: BoxStep) -> Self {
        Self {
            core: StepCore::new(),
            input,
            done: false,
        }
    }
}

impl ExecutionStep for CountStep {
    fn name(&self) -> &'static str {
        "Count"
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
        if self.done {
            return Ok(None);
        }
        let mut count = 0i64;
        while self.input.next(ctx)?.is_some() {
            count += 1;
        }
        self.done = true;
        Ok(Some(ResultRow::from_props([("count", Value::Int(count))])))
    }

    fn on_close(&mut self) {
        self.input.close();
    }

    fn inputs(&self) -> Vec<&dyn ExecutionStep> {
        vec![self.input.as_ref()]
    }
}

/// `field = <constant>` terms of a WHERE clause, in order.
fn equality_terms(where_clause: Option<&Expr>) -> Vec<(String, Expr)> {
    let Some(where_clause) = where_clause else {
        return Vec::new();
    };
    where_clause
        .clone()
        .into_conjuncts()
        .into_iter()
        .filter_map(|term| match term {
            Expr::Binary(BinaryOp::Eq, lhs, rhs) => match (*lhs, *rhs) {
                (Expr::Field(field), value) | (value, Expr::Field(field))
                    if value.is_constant() && !field.starts_with('@') =>
                {
                    Some((field, value))
                }
                _ => None,
            },
            _ => None,
        })
        .collect()
}

/// UPSERT: passes matching rows through; when nothing matched, creates the
/// record identified by a unique index whose fields are all pinned by
/// equality in the WHERE clause.
pub struct UpsertStep {
    core: StepCore,
    input: BoxStep,
    class: String,
    where_clause: Option<Expr>,
    matched_any: bool,
    created: bool,
}

impl UpsertStep {
    pub fn new(input: BoxStep, class: impl Into<String>, where_clause: Option<Expr>) -> Self {
        Self {
            core: StepCore::new(),
            input,
            class: class.into(),
            where_clause,
            matched_any: false,
            created: false,
        }
    }

    fn create(&self, ctx: &CommandContext) -> Result<ResultRow> {
        let terms = equality_terms(self.where_clause.as_ref());
        let pinned: Vec<&str> = terms.iter().map(|(field, _)| field.as_str()).collect();
        let covered = ctx
            .gateway()
            .class_indexes(&self.class)?
            .into_iter()
            .any(|index| {
                index.is_unique() && index.fields.iter().all(|f| pinned.contains(&f.as_str()))
            });
        if !covered {
            return Err(PenumbraError::CommandExecution(format!(
                "UPSERT on {} needs a unique index whose fields are all matched by equality in WHERE",
                self.class
            )));
        }
        let mut record = Record::new(self.class.clone());
        for (field, expr) in &terms {
            record
                .props
                .insert(field.clone(), eval(expr, &Scope::empty(), ctx)?);
        }
        tracing::debug!(class = %self.class, "upsert creating record");
        save_and_load(ctx.gateway(), record)
    }
}

impl ExecutionStep for UpsertStep {
    fn name(&self) -> &'static str {
        "Upsert"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        ctx.require_transaction("UPSERT")?;
        self.input.start(ctx)
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        if self.created {
            return Ok(None);
        }
        if let Some(row) = self.input.next(ctx)? {
            self.matched_any = true;
            return Ok(Some(row));
        }
        if self.matched_any {
            return Ok(None);
        }
        self.created = true;
        self.create(ctx).map(Some)
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

fn endpoint_ids(endpoint: &EdgeEndpoint, ctx: &CommandContext) -> Result<Vec<RecordId>> {
    match endpoint {
        EdgeEndpoint::Rids(rids) => Ok(rids.clone()),
        EdgeEndpoint::Query(statement) => {
            let mut ids = Vec::new();
            for row in run_nested(statement, ctx, None)? {
                if let Some(id) = row.identity() {
                    ids.push(id);
                    continue;
                }
                let mut links = row.properties().values().filter_map(Value::as_link);
                match (links.next(), links.next()) {
                    (Some(id), None) => ids.push(id),
                    _ => {
                        return Err(PenumbraError::CommandExecution(
                            "edge endpoint query must return records or a single link".into(),
                        ))
                    }
                }
            }
            Ok(ids)
        }
    }
}

/// CREATE EDGE: one edge per (from, to) pair. With UPSERT an existing edge
/// between the same endpoints is updated instead of duplicated.
pub struct CreateEdgesStep {
    core: StepCore,
    class: String,
    from: EdgeEndpoint,
    to: EdgeEndpoint,
    set: Vec<(String, Expr)>,
    upsert: bool,
    unique_index: Option<IndexDef>,
    pairs: VecDeque<(RecordId, RecordId)>,
}

impl CreateEdgesStep {
    pub fn new(
        class: impl Into<String>,
        from: EdgeEndpoint,
        to: EdgeEndpoint,
        set: Vec<(String, Expr)>,
        upsert: bool,
    ) -> Self {
        Self {
            core: StepCore::new(),
            class: class.into(),
            from,
            to,
            set,
            upsert,
            unique_index: None,
            pairs: VecDeque::new(),
        }
    }

    fn existing(&self, ctx: &CommandContext, from: RecordId, to: RecordId) -> Result<Option<Record>> {
        let Some(index) = &self.unique_index else {
            return Ok(None);
        };
        let key = index
            .fields
            .iter()
            .map(|field| Value::Link(if field == "out" { from } else { to }))
            .collect();
        let mut ids = ctx.gateway().lookup_index(
            &index.name,
            &IndexPredicate::Equals(key),
            ScanOrder::Ascending,
        )?;
        match ids.next_id()? {
            Some(id) => ctx.fetch(id),
            None => Ok(None),
        }
    }
}

impl ExecutionStep for CreateEdgesStep {
    fn name(&self) -> &'static str {
        "CreateEdges"
    }

    fn core(&self) -> &StepCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StepCore {
        &mut self.core
    }

    fn on_start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        ctx.require_transaction("CREATE EDGE")?;
        let gateway = ctx.gateway();
        gateway.require_class(&self.class)?;
        if !gateway.is_subclass_of(&self.class, EDGE_CLASS)? {
            return Err(PenumbraError::CommandExecution(format!(
                "class {} is not an edge class",
                self.class
            )));
        }
        if self.upsert {
            let index = gateway
                .class_indexes(&self.class)?
                .into_iter()
                .find(|index| index.is_unique() && index.covers_exactly(&["out", "in"]));
            if index.is_none() {
                return Err(PenumbraError::CommandExecution(format!(
                    "UPSERT on edge class {} needs a unique index on (out, in)",
                    self.class
                )));
            }
            self.unique_index = index;
        }
        let from = endpoint_ids(&self.from, ctx)?;
        let to = endpoint_ids(&self.to, ctx)?;
        for id in from.iter().chain(&to) {
            if ctx.fetch(*id)?.is_none() {
                return Err(PenumbraError::NotFound(format!("edge endpoint {id}")));
            }
        }
        self.pairs = from
            .iter()
            .flat_map(|out| to.iter().map(move |inn| (*out, *inn)))
            .collect();
        ctx.ensure_heap("CreateEdges", self.pairs.len())
    }

    fn produce(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        let Some((from, to)) = self.pairs.pop_front() else {
            return Ok(None);
        };
        let mut record = match self.existing(ctx, from, to)? {
            Some(record) => record,
            None => Record::new(self.class.clone())
                .with_property("out", from)
                .with_property("in", to),
        };
        for (field, expr) in &self.set {
            record
                .props
                .insert(field.clone(), eval(expr, &Scope::empty(), ctx)?);
        }
        save_and_load(ctx.gateway(), record).map(Some)
    }

    fn on_close(&mut self) {
        self.pairs.clear();
    }

    fn props(&self) -> Vec<ExplainProp> {
        let mut props = vec![ExplainProp::plain("class", self.class.clone())];
        if self.upsert {
            props.push(ExplainProp::plain("upsert", "true"));
        }
        props
    }
}

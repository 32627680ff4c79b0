//! Fluent builders for every statement kind.
//!
//! Builders are consumed by value. Mistakes that the command tree cannot
//! express (a hop with no pattern to extend, an UPDATE without operations)
//! are recorded and surface from `build`, so chains never panic halfway.

use std::time::Duration;

use crate::query::ast::{
    CreateEdgeStatement, DeleteKind, DeleteStatement, EdgeEndpoint, Expr, InsertSource,
    InsertStatement, LetItem, LetValue, MatchExpression, MatchFilter, MatchReturn,
    MatchStatement, OrderItem, PathItem, ProjectionItem, SelectStatement, Statement, Target,
    UpdateOperation, UpdateReturn, UpdateStatement,
};
use crate::query::context::Params;
use crate::query::executor::{Executor, ResultStream};
use crate::query::value::Value;
use crate::types::{PenumbraError, RecordId, Result};

/// Entry points for the statement builders.
pub struct QueryBuilder;

impl QueryBuilder {
    /// `SELECT ... FROM <class>`, polymorphic.
    pub fn select_from(class: impl Into<String>) -> SelectBuilder {
        SelectBuilder::new(Target::class(class))
    }

    /// `SELECT` over any target, including no target at all.
    pub fn select(target: Target) -> SelectBuilder {
        SelectBuilder::new(target)
    }

    /// `MATCH` starting with the given origin node.
    pub fn r#match(origin: impl Into<Node>) -> MatchBuilder {
        MatchBuilder::new().pattern(origin)
    }

    pub fn insert_into(class: impl Into<String>) -> InsertBuilder {
        InsertBuilder::new(class)
    }

    pub fn update(target: Target) -> UpdateBuilder {
        UpdateBuilder::new(target)
    }

    pub fn delete_from(target: Target) -> DeleteBuilder {
        DeleteBuilder::new(DeleteKind::Record, target)
    }

    pub fn delete_vertex(target: Target) -> DeleteBuilder {
        DeleteBuilder::new(DeleteKind::Vertex, target)
    }

    pub fn delete_edge(target: Target) -> DeleteBuilder {
        DeleteBuilder::new(DeleteKind::Edge, target)
    }

    pub fn create_edge(class: impl Into<String>) -> CreateEdgeBuilder {
        CreateEdgeBuilder::new(class)
    }
}

fn and_where(slot: &mut Option<Expr>, expr: Expr) {
    *slot = Some(match slot.take() {
        Some(existing) => existing.and(expr),
        None => expr,
    });
}

fn first_error(slot: &mut Option<PenumbraError>, err: PenumbraError) {
    if slot.is_none() {
        *slot = Some(err);
    }
}

/// Output column accepted by `project`/`returning` calls.
pub struct ProjectionSpec {
    item: ProjectionItem,
}

impl From<&str> for ProjectionSpec {
    fn from(field: &str) -> Self {
        Self {
            item: ProjectionItem::new(Expr::field(field)),
        }
    }
}

impl From<(&str, &str)> for ProjectionSpec {
    fn from((field, alias): (&str, &str)) -> Self {
        Self {
            item: ProjectionItem::aliased(Expr::field(field), alias),
        }
    }
}

impl From<Expr> for ProjectionSpec {
    fn from(expr: Expr) -> Self {
        Self {
            item: ProjectionItem::new(expr),
        }
    }
}

impl From<(Expr, &str)> for ProjectionSpec {
    fn from((expr, alias): (Expr, &str)) -> Self {
        Self {
            item: ProjectionItem::aliased(expr, alias),
        }
    }
}

impl From<ProjectionItem> for ProjectionSpec {
    fn from(item: ProjectionItem) -> Self {
        Self { item }
    }
}

#[derive(Clone, Copy, Debug)]
enum PredicateMode {
    And,
    Or,
}

/// Builds a predicate over properties of the current row.
///
/// ```ignore
/// select.where_with(|p| {
///     p.ge("age", 21).or_group(|q| {
///         q.eq("city", "Rome").eq("city", "Oslo");
///     });
/// })
/// ```
pub struct PredicateBuilder {
    mode: PredicateMode,
    exprs: Vec<Expr>,
    error: Option<PenumbraError>,
}

impl PredicateBuilder {
    fn with_mode(mode: PredicateMode) -> Self {
        Self {
            mode,
            exprs: Vec::new(),
            error: None,
        }
    }

    fn push(&mut self, expr: Expr) -> &mut Self {
        if self.error.is_none() {
            self.exprs.push(expr);
        }
        self
    }

    fn finish(self) -> Result<Expr> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut exprs = self.exprs;
        match exprs.len() {
            0 => Err(PenumbraError::Invalid(
                "predicate group must emit at least one predicate",
            )),
            1 => exprs
                .pop()
                .ok_or(PenumbraError::Invalid("predicate group is empty")),
            _ => Ok(match self.mode {
                PredicateMode::And => Expr::And(exprs),
                PredicateMode::Or => Expr::Or(exprs),
            }),
        }
    }

    fn group<F>(mode: PredicateMode, build: F) -> Result<Expr>
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        let mut nested = PredicateBuilder::with_mode(mode);
        build(&mut nested);
        nested.finish()
    }

    fn push_group(&mut self, result: Result<Expr>, wrap: fn(Expr) -> Expr) -> &mut Self {
        match result {
            Ok(expr) => self.push(wrap(expr)),
            Err(err) => {
                first_error(&mut self.error, err);
                self
            }
        }
    }

    pub fn eq(&mut self, prop: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Expr::field(prop).eq(Expr::lit(value)))
    }

    pub fn ne(&mut self, prop: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Expr::field(prop).ne(Expr::lit(value)))
    }

    pub fn lt(&mut self, prop: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Expr::field(prop).lt(Expr::lit(value)))
    }

    pub fn le(&mut self, prop: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Expr::field(prop).le(Expr::lit(value)))
    }

    pub fn gt(&mut self, prop: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Expr::field(prop).gt(Expr::lit(value)))
    }

    pub fn ge(&mut self, prop: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Expr::field(prop).ge(Expr::lit(value)))
    }

    /// Inclusive range on both ends.
    pub fn between(
        &mut self,
        prop: &str,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> &mut Self {
        self.push(Expr::field(prop).between(Expr::lit(low), Expr::lit(high)))
    }

    pub fn in_list<I, V>(&mut self, prop: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push(Expr::field(prop).in_(Expr::list(values)))
    }

    pub fn contains(&mut self, prop: &str, value: impl Into<Value>) -> &mut Self {
        self.push(Expr::field(prop).contains(Expr::lit(value)))
    }

    pub fn is_null(&mut self, prop: &str) -> &mut Self {
        self.push(Expr::field(prop).is_null())
    }

    pub fn is_not_null(&mut self, prop: &str) -> &mut Self {
        self.push(Expr::field(prop).is_not_null())
    }

    /// Arbitrary expression term.
    pub fn expr(&mut self, expr: Expr) -> &mut Self {
        self.push(expr)
    }

    pub fn and_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        let result = Self::group(PredicateMode::And, build);
        self.push_group(result, |expr| expr)
    }

    pub fn or_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        let result = Self::group(PredicateMode::Or, build);
        self.push_group(result, |expr| expr)
    }

    pub fn not_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        let result = Self::group(PredicateMode::And, build);
        self.push_group(result, Expr::negate)
    }
}

fn predicate<F>(build: F) -> Result<Expr>
where
    F: FnOnce(&mut PredicateBuilder),
{
    let mut builder = PredicateBuilder::with_mode(PredicateMode::And);
    build(&mut builder);
    builder.finish()
}

/// Builder for [`SelectStatement`].
pub struct SelectBuilder {
    statement: SelectStatement,
    error: Option<PenumbraError>,
}

impl SelectBuilder {
    pub fn new(target: Target) -> Self {
        Self {
            statement: SelectStatement {
                target,
                ..SelectStatement::default()
            },
            error: None,
        }
    }

    /// Appends output columns.
    pub fn project<I, P>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProjectionSpec>,
    {
        self.statement
            .projection
            .extend(items.into_iter().map(|item| item.into().item));
        self
    }

    pub fn distinct(mut self) -> Self {
        self.statement.distinct = true;
        self
    }

    pub fn let_expr(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.statement.lets.push(LetItem {
            name: name.into(),
            value: LetValue::Expr(expr),
        });
        self
    }

    pub fn let_query(mut self, name: impl Into<String>, query: impl Into<Statement>) -> Self {
        self.statement.lets.push(LetItem {
            name: name.into(),
            value: LetValue::Query(Box::new(query.into())),
        });
        self
    }

    /// ANDs a condition into WHERE.
    pub fn filter(mut self, expr: Expr) -> Self {
        and_where(&mut self.statement.where_clause, expr);
        self
    }

    /// ANDs a predicate assembled with a [`PredicateBuilder`] into WHERE.
    pub fn where_with<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        match predicate(build) {
            Ok(expr) => and_where(&mut self.statement.where_clause, expr),
            Err(err) => first_error(&mut self.error, err),
        }
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.statement.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.statement.order_by.push(item);
        self
    }

    pub fn skip(mut self, skip: impl Into<Expr>) -> Self {
        self.statement.skip = Some(skip.into());
        self
    }

    pub fn limit(mut self, limit: impl Into<Expr>) -> Self {
        self.statement.limit = Some(limit.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.statement.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<SelectStatement> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.statement),
        }
    }

    pub fn execute(self, executor: &Executor, params: Params) -> Result<ResultStream> {
        executor.execute(&self.build()?.into(), params)
    }
}

/// Node of a MATCH pattern.
#[derive(Clone, Debug, Default)]
pub struct Node {
    filter: MatchFilter,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node bound to `alias`.
    pub fn alias(alias: impl Into<String>) -> Self {
        Self::new().named(alias)
    }

    /// Unnamed node restricted to `class`.
    pub fn class(class: impl Into<String>) -> Self {
        Self::new().of_class(class)
    }

    pub fn named(mut self, alias: impl Into<String>) -> Self {
        self.filter.alias = Some(alias.into());
        self
    }

    pub fn of_class(mut self, class: impl Into<String>) -> Self {
        self.filter.class = Some(class.into());
        self
    }

    pub fn rid(mut self, rid: RecordId) -> Self {
        self.filter.rid = Some(rid);
        self
    }

    /// ANDs a condition into the node filter.
    pub fn filter(mut self, expr: Expr) -> Self {
        and_where(&mut self.filter.where_clause, expr);
        self
    }

    /// Keeps a recursive traversal expanding while `expr` holds.
    pub fn while_(mut self, expr: Expr) -> Self {
        self.filter.while_clause = Some(expr);
        self
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.filter.max_depth = Some(depth);
        self
    }

    pub fn optional(mut self) -> Self {
        self.filter.optional = true;
        self
    }

    pub fn depth_alias(mut self, alias: impl Into<String>) -> Self {
        self.filter.depth_alias = Some(alias.into());
        self
    }

    pub fn path_alias(mut self, alias: impl Into<String>) -> Self {
        self.filter.path_alias = Some(alias.into());
        self
    }

    pub fn into_filter(self) -> MatchFilter {
        self.filter
    }
}

impl From<&str> for Node {
    fn from(alias: &str) -> Self {
        Node::alias(alias)
    }
}

impl From<MatchFilter> for Node {
    fn from(filter: MatchFilter) -> Self {
        Self { filter }
    }
}

/// Which pattern list the next hop extends.
#[derive(Clone, Copy, Debug)]
enum Current {
    Positive(usize),
    Negative(usize),
}

/// Builder for [`MatchStatement`].
pub struct MatchBuilder {
    patterns: Vec<MatchExpression>,
    not_patterns: Vec<MatchExpression>,
    current: Option<Current>,
    items: Vec<ProjectionItem>,
    returns: Option<MatchReturn>,
    distinct: bool,
    group_by: Vec<Expr>,
    order_by: Vec<OrderItem>,
    skip: Option<Expr>,
    limit: Option<Expr>,
    timeout: Option<Duration>,
    error: Option<PenumbraError>,
}

impl Default for MatchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchBuilder {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            not_patterns: Vec::new(),
            current: None,
            items: Vec::new(),
            returns: None,
            distinct: false,
            group_by: Vec::new(),
            order_by: Vec::new(),
            skip: None,
            limit: None,
            timeout: None,
            error: None,
        }
    }

    /// Starts a new comma-separated pattern at `origin`.
    pub fn pattern(mut self, origin: impl Into<Node>) -> Self {
        self.patterns.push(MatchExpression {
            origin: origin.into().into_filter(),
            items: Vec::new(),
        });
        self.current = Some(Current::Positive(self.patterns.len() - 1));
        self
    }

    /// Starts a NOT pattern; `origin` must name an alias of a positive pattern.
    pub fn not_pattern(mut self, origin: impl Into<String>) -> Self {
        self.not_patterns.push(MatchExpression {
            origin: Node::alias(origin).into_filter(),
            items: Vec::new(),
        });
        self.current = Some(Current::Negative(self.not_patterns.len() - 1));
        self
    }

    /// Appends a hop to the pattern started last.
    pub fn hop<I, L>(mut self, method: &str, labels: I, target: impl Into<Node>) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        let item = PathItem {
            method: method.to_owned(),
            labels: labels.into_iter().map(Into::into).collect(),
            filter: target.into().into_filter(),
        };
        let pattern = match self.current {
            Some(Current::Positive(idx)) => self.patterns.get_mut(idx),
            Some(Current::Negative(idx)) => self.not_patterns.get_mut(idx),
            None => None,
        };
        match pattern {
            Some(pattern) => pattern.items.push(item),
            None => first_error(
                &mut self.error,
                PenumbraError::Invalid("a hop needs a pattern to extend"),
            ),
        }
        self
    }

    /// `.out('label'){target}`; an empty label follows every edge class.
    pub fn out(self, label: &str, target: impl Into<Node>) -> Self {
        self.hop("out", labels(label), target)
    }

    pub fn in_(self, label: &str, target: impl Into<Node>) -> Self {
        self.hop("in", labels(label), target)
    }

    pub fn both(self, label: &str, target: impl Into<Node>) -> Self {
        self.hop("both", labels(label), target)
    }

    pub fn out_e(self, label: &str, target: impl Into<Node>) -> Self {
        self.hop("outE", labels(label), target)
    }

    pub fn in_e(self, label: &str, target: impl Into<Node>) -> Self {
        self.hop("inE", labels(label), target)
    }

    pub fn in_v(self, target: impl Into<Node>) -> Self {
        self.hop("inV", labels(""), target)
    }

    pub fn out_v(self, target: impl Into<Node>) -> Self {
        self.hop("outV", labels(""), target)
    }

    /// Adds projected RETURN items.
    pub fn returning<I, P>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProjectionSpec>,
    {
        self.items.extend(items.into_iter().map(|item| item.into().item));
        self
    }

    pub fn return_matches(mut self) -> Self {
        self.returns = Some(MatchReturn::Matches);
        self
    }

    pub fn return_patterns(mut self) -> Self {
        self.returns = Some(MatchReturn::Patterns);
        self
    }

    pub fn return_paths(mut self) -> Self {
        self.returns = Some(MatchReturn::Paths);
        self
    }

    pub fn return_elements(mut self) -> Self {
        self.returns = Some(MatchReturn::Elements);
        self
    }

    pub fn return_path_elements(mut self) -> Self {
        self.returns = Some(MatchReturn::PathElements);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn group_by(mut self, expr: Expr) -> Self {
        self.group_by.push(expr);
        self
    }

    pub fn order_by(mut self, item: OrderItem) -> Self {
        self.order_by.push(item);
        self
    }

    pub fn skip(mut self, skip: impl Into<Expr>) -> Self {
        self.skip = Some(skip.into());
        self
    }

    pub fn limit(mut self, limit: impl Into<Expr>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Without an explicit RETURN the statement returns `$matches`.
    pub fn build(self) -> Result<MatchStatement> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let returns = match (self.returns, self.items.is_empty()) {
            (Some(_), false) => {
                return Err(PenumbraError::Invalid(
                    "RETURN takes either items or one special return shape",
                ))
            }
            (Some(shape), true) => shape,
            (None, false) => MatchReturn::Items(self.items),
            (None, true) => MatchReturn::Matches,
        };
        Ok(MatchStatement {
            patterns: self.patterns,
            not_patterns: self.not_patterns,
            returns,
            distinct: self.distinct,
            group_by: self.group_by,
            order_by: self.order_by,
            skip: self.skip,
            limit: self.limit,
            timeout: self.timeout,
        })
    }

    pub fn execute(self, executor: &Executor, params: Params) -> Result<ResultStream> {
        executor.execute(&self.build()?.into(), params)
    }
}

fn labels(label: &str) -> Vec<String> {
    if label.is_empty() {
        Vec::new()
    } else {
        vec![label.to_owned()]
    }
}

/// Builder for [`InsertStatement`].
pub struct InsertBuilder {
    class: String,
    source: Option<InsertSource>,
    error: Option<PenumbraError>,
}

impl InsertBuilder {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            source: None,
            error: None,
        }
    }

    fn conflicting(&mut self) {
        first_error(
            &mut self.error,
            PenumbraError::Invalid("INSERT takes one of VALUES, SET or FROM"),
        );
    }

    /// `SET field = expr`; repeated calls add more pairs.
    pub fn set(mut self, field: impl Into<String>, expr: impl Into<Expr>) -> Self {
        let pair = (field.into(), expr.into());
        match &mut self.source {
            None => self.source = Some(InsertSource::Set(vec![pair])),
            Some(InsertSource::Set(pairs)) => pairs.push(pair),
            Some(_) => self.conflicting(),
        }
        self
    }

    /// `(fields) VALUES (row)`; repeated calls add more rows.
    pub fn values<F, R>(mut self, fields: F, row: R) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<Expr>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let row: Vec<Expr> = row.into_iter().map(Into::into).collect();
        if fields.len() != row.len() {
            first_error(
                &mut self.error,
                PenumbraError::Invalid("VALUES row width differs from the field list"),
            );
            return self;
        }
        match &mut self.source {
            None => self.source = Some(InsertSource::Values { fields, rows: vec![row] }),
            Some(InsertSource::Values {
                fields: existing,
                rows,
            }) if *existing == fields => rows.push(row),
            Some(_) => self.conflicting(),
        }
        self
    }

    /// `FROM (query)`: one record per row of the query.
    pub fn from_query(mut self, query: impl Into<Statement>) -> Self {
        match self.source {
            None => self.source = Some(InsertSource::Query(Box::new(query.into()))),
            Some(_) => self.conflicting(),
        }
        self
    }

    pub fn build(self) -> Result<InsertStatement> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(InsertStatement {
            class: self.class,
            source: self.source.unwrap_or(InsertSource::Set(Vec::new())),
        })
    }

    pub fn execute(self, executor: &Executor, params: Params) -> Result<ResultStream> {
        executor.execute(&self.build()?.into(), params)
    }
}

/// Builder for [`UpdateStatement`].
pub struct UpdateBuilder {
    statement: UpdateStatement,
    error: Option<PenumbraError>,
}

impl UpdateBuilder {
    pub fn new(target: Target) -> Self {
        Self {
            statement: UpdateStatement {
                target,
                ..UpdateStatement::default()
            },
            error: None,
        }
    }

    pub fn set(mut self, field: impl Into<String>, expr: impl Into<Expr>) -> Self {
        self.statement
            .operations
            .push(UpdateOperation::Set(field.into(), expr.into()));
        self
    }

    pub fn increment(mut self, field: impl Into<String>, by: impl Into<Expr>) -> Self {
        self.statement
            .operations
            .push(UpdateOperation::Increment(field.into(), by.into()));
        self
    }

    pub fn remove(mut self, field: impl Into<String>) -> Self {
        self.statement
            .operations
            .push(UpdateOperation::Remove(field.into()));
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        and_where(&mut self.statement.where_clause, expr);
        self
    }

    pub fn where_with<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        match predicate(build) {
            Ok(expr) => and_where(&mut self.statement.where_clause, expr),
            Err(err) => first_error(&mut self.error, err),
        }
        self
    }

    pub fn upsert(mut self) -> Self {
        self.statement.upsert = true;
        self
    }

    pub fn returning(mut self, returning: UpdateReturn) -> Self {
        self.statement.returning = returning;
        self
    }

    pub fn limit(mut self, limit: impl Into<Expr>) -> Self {
        self.statement.limit = Some(limit.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.statement.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<UpdateStatement> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.statement.operations.is_empty() {
            return Err(PenumbraError::Invalid("UPDATE needs at least one operation"));
        }
        Ok(self.statement)
    }

    pub fn execute(self, executor: &Executor, params: Params) -> Result<ResultStream> {
        executor.execute(&self.build()?.into(), params)
    }
}

/// Builder for [`DeleteStatement`].
pub struct DeleteBuilder {
    statement: DeleteStatement,
    error: Option<PenumbraError>,
}

impl DeleteBuilder {
    pub fn new(kind: DeleteKind, target: Target) -> Self {
        Self {
            statement: DeleteStatement {
                kind,
                target,
                ..DeleteStatement::default()
            },
            error: None,
        }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        and_where(&mut self.statement.where_clause, expr);
        self
    }

    pub fn where_with<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        match predicate(build) {
            Ok(expr) => and_where(&mut self.statement.where_clause, expr),
            Err(err) => first_error(&mut self.error, err),
        }
        self
    }

    pub fn limit(mut self, limit: impl Into<Expr>) -> Self {
        self.statement.limit = Some(limit.into());
        self
    }

    /// Allows a plain DELETE to remove vertices and edges.
    pub fn unsafe_delete(mut self) -> Self {
        self.statement.unsafe_delete = true;
        self
    }

    pub fn return_before(mut self) -> Self {
        self.statement.return_before = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.statement.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<DeleteStatement> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.statement),
        }
    }

    pub fn execute(self, executor: &Executor, params: Params) -> Result<ResultStream> {
        executor.execute(&self.build()?.into(), params)
    }
}

/// Builder for [`CreateEdgeStatement`].
pub struct CreateEdgeBuilder {
    class: String,
    from: Option<EdgeEndpoint>,
    to: Option<EdgeEndpoint>,
    set: Vec<(String, Expr)>,
    upsert: bool,
}

impl CreateEdgeBuilder {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            from: None,
            to: None,
            set: Vec::new(),
            upsert: false,
        }
    }

    pub fn from_rids(mut self, rids: impl IntoIterator<Item = RecordId>) -> Self {
        self.from = Some(EdgeEndpoint::Rids(rids.into_iter().collect()));
        self
    }

    pub fn from_query(mut self, query: impl Into<Statement>) -> Self {
        self.from = Some(EdgeEndpoint::Query(Box::new(query.into())));
        self
    }

    pub fn to_rids(mut self, rids: impl IntoIterator<Item = RecordId>) -> Self {
        self.to = Some(EdgeEndpoint::Rids(rids.into_iter().collect()));
        self
    }

    pub fn to_query(mut self, query: impl Into<Statement>) -> Self {
        self.to = Some(EdgeEndpoint::Query(Box::new(query.into())));
        self
    }

    pub fn set(mut self, field: impl Into<String>, expr: impl Into<Expr>) -> Self {
        self.set.push((field.into(), expr.into()));
        self
    }

    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    pub fn build(self) -> Result<CreateEdgeStatement> {
        let (Some(from), Some(to)) = (self.from, self.to) else {
            return Err(PenumbraError::Invalid("CREATE EDGE needs both FROM and TO"));
        };
        Ok(CreateEdgeStatement {
            class: self.class,
            from,
            to,
            set: self.set,
            upsert: self.upsert,
        })
    }

    pub fn execute(self, executor: &Executor, params: Params) -> Result<ResultStream> {
        executor.execute(&self.build()?.into(), params)
    }
}

//! Command tree consumed by the planner.
//!
//! The parser lives outside this crate; it produces the structures defined
//! here, which map one-to-one onto the statement kinds the planner accepts.
//! [`crate::query::builder`] offers a fluent way to assemble them in code.

use std::fmt;
use std::time::Duration;

use crate::query::value::Value;
use crate::types::{ClusterId, RecordId};

/// Unary operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    In,
    Contains,
    ContainsAny,
    ContainsKey,
    ContainsValue,
    Like,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::In => "IN",
            BinaryOp::Contains => "CONTAINS",
            BinaryOp::ContainsAny => "CONTAINSANY",
            BinaryOp::ContainsKey => "CONTAINSKEY",
            BinaryOp::ContainsValue => "CONTAINSVALUE",
            BinaryOp::Like => "LIKE",
        }
    }

    /// Operator with its operands swapped (`a < b` becomes `b > a`).
    pub fn flipped(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::Eq),
            BinaryOp::Lt => Some(BinaryOp::Gt),
            BinaryOp::Le => Some(BinaryOp::Ge),
            BinaryOp::Gt => Some(BinaryOp::Lt),
            BinaryOp::Ge => Some(BinaryOp::Le),
            _ => None,
        }
    }
}

/// Names of aggregate functions.
pub const AGGREGATE_FUNCTIONS: [&str; 5] = ["count", "sum", "min", "max", "avg"];

/// Expression tree shared by filters, projections, sort keys and patterns.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Named (`:name`) or positional (`?`, named by index) parameter.
    Param(String),
    /// Property of the current row, or `@rid` / `@class` / `@version`.
    Field(String),
    /// Context variable: `$depth`, `$matched`, `$currentMatch`, `$current` or a LET name.
    Variable(String),
    Member(Box<Expr>, String),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Between(Box<Expr>, Box<Expr>, Box<Expr>),
    Function { name: String, args: Vec<Expr> },
    SubQuery(Box<Statement>),
}

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    /// `$matched.<alias>`
    pub fn matched(alias: impl Into<String>) -> Self {
        Expr::var("matched").member(alias)
    }

    /// `$depth`
    pub fn depth() -> Self {
        Expr::var("depth")
    }

    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    /// `count(*)`
    pub fn count_star() -> Self {
        Expr::func("count", Vec::new())
    }

    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::List(values.into_iter().map(Expr::lit).collect())
    }

    pub fn subquery(statement: impl Into<Statement>) -> Self {
        Expr::SubQuery(Box::new(statement.into()))
    }

    pub fn member(self, name: impl Into<String>) -> Self {
        Expr::Member(Box::new(self), name.into())
    }

    fn binary(self, op: BinaryOp, rhs: impl Into<Expr>) -> Self {
        Expr::Binary(op, Box::new(self), Box::new(rhs.into()))
    }

    pub fn eq(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn ne(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, rhs)
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, rhs)
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, rhs)
    }

    pub fn add(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mul, rhs)
    }

    pub fn in_(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::In, rhs)
    }

    pub fn contains(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Contains, rhs)
    }

    pub fn contains_any(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::ContainsAny, rhs)
    }

    pub fn contains_key(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::ContainsKey, rhs)
    }

    pub fn contains_value(self, rhs: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::ContainsValue, rhs)
    }

    pub fn like(self, pattern: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Like, pattern)
    }

    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Expr::Between(Box::new(self), Box::new(low.into()), Box::new(high.into()))
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNotNull(Box::new(self))
    }

    pub fn negate(self) -> Self {
        Expr::Unary(UnaryOp::Not, Box::new(self))
    }

    /// Conjunction, flattening nested ANDs.
    pub fn and(self, rhs: impl Into<Expr>) -> Self {
        let mut terms = self.into_conjuncts();
        terms.extend(rhs.into().into_conjuncts());
        Expr::And(terms)
    }

    /// Disjunction, flattening nested ORs.
    pub fn or(self, rhs: impl Into<Expr>) -> Self {
        let mut terms = match self {
            Expr::Or(terms) => terms,
            other => vec![other],
        };
        match rhs.into() {
            Expr::Or(more) => terms.extend(more),
            other => terms.push(other),
        }
        Expr::Or(terms)
    }

    /// Splits a conjunction into its terms.
    pub fn into_conjuncts(self) -> Vec<Expr> {
        match self {
            Expr::And(terms) => terms.into_iter().flat_map(Expr::into_conjuncts).collect(),
            other => vec![other],
        }
    }

    /// Rebuilds a conjunction from terms; `None` when empty.
    pub fn conjunction(mut terms: Vec<Expr>) -> Option<Expr> {
        match terms.len() {
            0 => None,
            1 => terms.pop(),
            _ => Some(Expr::And(terms)),
        }
    }

    /// Plain property name when the expression is a bare field reference.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Expr::Field(name) => Some(name),
            _ => None,
        }
    }

    /// Visits this node and its children in pre-order. Sub-queries are not entered.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Literal(_)
            | Expr::Param(_)
            | Expr::Field(_)
            | Expr::Variable(_)
            | Expr::SubQuery(_) => {}
            Expr::Member(inner, _)
            | Expr::Unary(_, inner)
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner) => inner.walk(visit),
            Expr::Binary(_, lhs, rhs) => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Between(value, low, high) => {
                value.walk(visit);
                low.walk(visit);
                high.walk(visit);
            }
            Expr::List(items) | Expr::And(items) | Expr::Or(items) => {
                items.iter().for_each(|item| item.walk(visit));
            }
            Expr::Function { args, .. } => args.iter().for_each(|arg| arg.walk(visit)),
        }
    }

    /// Aliases read through `$matched.<alias>`, in order of appearance.
    pub fn matched_aliases(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        self.walk(&mut |expr| {
            if let Expr::Member(inner, alias) = expr {
                if matches!(inner.as_ref(), Expr::Variable(name) if name == "matched")
                    && !out.contains(alias)
                {
                    out.push(alias.clone());
                }
            }
        });
        out
    }

    /// True when the expression contains an aggregate function call.
    pub fn has_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |expr| {
            if let Expr::Function { name, .. } = expr {
                if AGGREGATE_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str()) {
                    found = true;
                }
            }
        });
        found
    }

    /// True when evaluation depends on the current row.
    pub fn refers_to_row(&self) -> bool {
        let mut found = false;
        self.walk(&mut |expr| match expr {
            Expr::Field(_) => found = true,
            Expr::Variable(name) if name == "current" => found = true,
            _ => {}
        });
        found
    }

    /// True when evaluation reads context variables (`$matched`, `$depth`, ...).
    pub fn refers_to_variables(&self) -> bool {
        let mut found = false;
        self.walk(&mut |expr| {
            if matches!(expr, Expr::Variable(_)) {
                found = true;
            }
        });
        found
    }

    /// True for expressions whose value is fixed for the whole command.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Param(_) => true,
            Expr::List(items) => items.iter().all(Expr::is_constant),
            Expr::Unary(UnaryOp::Neg, inner) => inner.is_constant(),
            _ => false,
        }
    }

    /// Default output name for a projection of this expression.
    pub fn default_alias(&self) -> String {
        match self {
            Expr::Field(name) => name.clone(),
            other => other.to_string(),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::lit(value)
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::lit(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::lit(value)
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::lit(value)
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::lit(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::lit(value)
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, "{sep}")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::String(s)) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Param(name) if name.parse::<usize>().is_ok() => write!(f, "?"),
            Expr::Param(name) => write!(f, ":{name}"),
            Expr::Field(name) => write!(f, "{name}"),
            Expr::Variable(name) => write!(f, "${name}"),
            Expr::Member(inner, name) => write!(f, "{inner}.{name}"),
            Expr::List(items) => {
                write!(f, "[")?;
                write_joined(f, items, ", ")?;
                write!(f, "]")
            }
            Expr::Unary(UnaryOp::Neg, inner) => write!(f, "-{inner}"),
            Expr::Unary(UnaryOp::Not, inner) => write!(f, "NOT ({inner})"),
            Expr::Binary(op, lhs, rhs) => write!(f, "{lhs} {} {rhs}", op.symbol()),
            Expr::And(items) => {
                write!(f, "(")?;
                write_joined(f, items, " AND ")?;
                write!(f, ")")
            }
            Expr::Or(items) => {
                write!(f, "(")?;
                write_joined(f, items, " OR ")?;
                write!(f, ")")
            }
            Expr::IsNull(inner) => write!(f, "{inner} IS NULL"),
            Expr::IsNotNull(inner) => write!(f, "{inner} IS NOT NULL"),
            Expr::Between(value, low, high) => write!(f, "{value} BETWEEN {low} AND {high}"),
            Expr::Function { name, args } if args.is_empty() && name == "count" => {
                write!(f, "count(*)")
            }
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                write_joined(f, args, ", ")?;
                write!(f, ")")
            }
            Expr::SubQuery(statement) => write!(f, "({} sub-query)", statement.kind_name()),
        }
    }
}

/// One output column.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl ProjectionItem {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    /// Name of the produced property.
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.expr.default_alias())
    }
}

/// Sort direction of an ORDER BY item.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY item.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderItem {
    pub expr: Expr,
    pub direction: SortDirection,
}

impl OrderItem {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Desc,
        }
    }
}

/// Value bound by a LET clause.
#[derive(Clone, Debug, PartialEq)]
pub enum LetValue {
    Expr(Expr),
    Query(Box<Statement>),
}

/// `LET $name = ...`
#[derive(Clone, Debug, PartialEq)]
pub struct LetItem {
    pub name: String,
    pub value: LetValue,
}

/// Source of records for SELECT/UPDATE/DELETE.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Target {
    /// No source: a single empty row (`SELECT 1 + 1`).
    #[default]
    None,
    Class { name: String, polymorphic: bool },
    Cluster(ClusterId),
    Rids(Vec<RecordId>),
    SubQuery(Box<Statement>),
}

impl Target {
    /// Polymorphic class target.
    pub fn class(name: impl Into<String>) -> Self {
        Target::Class {
            name: name.into(),
            polymorphic: true,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Target::Class { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// SELECT statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectStatement {
    /// Empty means all properties of the source rows.
    pub projection: Vec<ProjectionItem>,
    pub distinct: bool,
    pub target: Target,
    pub lets: Vec<LetItem>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
    pub timeout: Option<Duration>,
}

/// Node constraints of a MATCH pattern item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchFilter {
    pub alias: Option<String>,
    pub class: Option<String>,
    pub rid: Option<RecordId>,
    pub where_clause: Option<Expr>,
    /// Keeps a recursive traversal expanding while true.
    pub while_clause: Option<Expr>,
    pub max_depth: Option<u32>,
    pub optional: bool,
    pub depth_alias: Option<String>,
    pub path_alias: Option<String>,
}

impl MatchFilter {
    /// True when the filter drives a recursive traversal.
    pub fn is_recursive(&self) -> bool {
        self.while_clause.is_some() || self.max_depth.is_some()
    }
}

/// One hop of a MATCH pattern: traversal method plus the target node filter.
#[derive(Clone, Debug, PartialEq)]
pub struct PathItem {
    /// `out`, `in`, `both`, `outE`, `inE`, `bothE`, `outV`, `inV` or `bothV`.
    pub method: String,
    /// Edge classes to follow; empty follows every edge.
    pub labels: Vec<String>,
    pub filter: MatchFilter,
}

/// A comma-separated MATCH expression: origin node and its chain of hops.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatchExpression {
    pub origin: MatchFilter,
    pub items: Vec<PathItem>,
}

/// RETURN clause of a MATCH statement.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchReturn {
    Items(Vec<ProjectionItem>),
    Matches,
    Patterns,
    Paths,
    Elements,
    PathElements,
}

/// MATCH statement.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchStatement {
    pub patterns: Vec<MatchExpression>,
    pub not_patterns: Vec<MatchExpression>,
    pub returns: MatchReturn,
    pub distinct: bool,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<Expr>,
    pub limit: Option<Expr>,
    pub timeout: Option<Duration>,
}

/// Row source of an INSERT.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertSource {
    /// `INSERT INTO C (a, b) VALUES (1, 2), (3, 4)`
    Values {
        fields: Vec<String>,
        rows: Vec<Vec<Expr>>,
    },
    /// `INSERT INTO C SET a = 1, b = 2`
    Set(Vec<(String, Expr)>),
    /// `INSERT INTO C FROM (SELECT ...)`
    Query(Box<Statement>),
}

/// INSERT statement.
#[derive(Clone, Debug, PartialEq)]
pub struct InsertStatement {
    pub class: String,
    pub source: InsertSource,
}

/// One UPDATE operation.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOperation {
    Set(String, Expr),
    Increment(String, Expr),
    Remove(String),
}

/// What an UPDATE returns.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum UpdateReturn {
    #[default]
    Count,
    Before,
    After,
}

/// UPDATE statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateStatement {
    pub target: Target,
    pub operations: Vec<UpdateOperation>,
    pub where_clause: Option<Expr>,
    pub upsert: bool,
    pub returning: UpdateReturn,
    pub limit: Option<Expr>,
    pub timeout: Option<Duration>,
}

/// Record kind a DELETE is restricted to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeleteKind {
    /// Plain `DELETE FROM`; graph elements need `UNSAFE`.
    #[default]
    Record,
    Vertex,
    Edge,
}

/// DELETE statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteStatement {
    pub kind: DeleteKind,
    pub target: Target,
    pub where_clause: Option<Expr>,
    pub limit: Option<Expr>,
    pub unsafe_delete: bool,
    pub return_before: bool,
    pub timeout: Option<Duration>,
}

/// Endpoint set of a CREATE EDGE.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeEndpoint {
    Rids(Vec<RecordId>),
    Query(Box<Statement>),
}

/// CREATE EDGE statement.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateEdgeStatement {
    pub class: String,
    pub from: EdgeEndpoint,
    pub to: EdgeEndpoint,
    pub set: Vec<(String, Expr)>,
    pub upsert: bool,
}

/// Any command the planner accepts.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Match(MatchStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    CreateEdge(CreateEdgeStatement),
}

impl Statement {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Statement::Select(_) => "SELECT",
            Statement::Match(_) => "MATCH",
            Statement::Insert(_) => "INSERT",
            Statement::Update(_) => "UPDATE",
            Statement::Delete(_) => "DELETE",
            Statement::CreateEdge(_) => "CREATE EDGE",
        }
    }

    /// True for statements that mutate records.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Statement::Select(_) | Statement::Match(_))
    }

    /// True when a nested statement reads `$parent`, so it must be evaluated per row.
    pub fn refers_to_parent(&self) -> bool {
        let mut exprs: Vec<&Expr> = Vec::new();
        match self {
            Statement::Select(select) => {
                exprs.extend(select.where_clause.iter());
                exprs.extend(select.projection.iter().map(|item| &item.expr));
            }
            Statement::Match(statement) => {
                for pattern in &statement.patterns {
                    exprs.extend(pattern.origin.where_clause.iter());
                    for item in &pattern.items {
                        exprs.extend(item.filter.where_clause.iter());
                    }
                }
            }
            _ => {}
        }
        exprs.into_iter().any(|expr| {
            let mut found = false;
            expr.walk(&mut |node| {
                if matches!(node, Expr::Variable(name) if name == "parent") {
                    found = true;
                }
            });
            found
        })
    }
}

impl From<SelectStatement> for Statement {
    fn from(value: SelectStatement) -> Self {
        Statement::Select(value)
    }
}

impl From<MatchStatement> for Statement {
    fn from(value: MatchStatement) -> Self {
        Statement::Match(value)
    }
}

impl From<InsertStatement> for Statement {
    fn from(value: InsertStatement) -> Self {
        Statement::Insert(value)
    }
}

impl From<UpdateStatement> for Statement {
    fn from(value: UpdateStatement) -> Self {
        Statement::Update(value)
    }
}

impl From<DeleteStatement> for Statement {
    fn from(value: DeleteStatement) -> Self {
        Statement::Delete(value)
    }
}

impl From<CreateEdgeStatement> for Statement {
    fn from(value: CreateEdgeStatement) -> Self {
        Statement::CreateEdge(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matched_aliases_are_collected_once() {
        let expr = Expr::field("name")
            .eq(Expr::matched("b").member("name"))
            .and(Expr::matched("b").member("age").gt(Expr::matched("c").member("age")));
        assert_eq!(expr.matched_aliases(), vec!["b".to_owned(), "c".to_owned()]);
    }

    #[test]
    fn display_renders_sql_like_text() {
        let expr = Expr::field("name")
            .eq("n1")
            .and(Expr::field("age").between(1, 3));
        assert_eq!(expr.to_string(), "(name = 'n1' AND age BETWEEN 1 AND 3)");
        assert_eq!(Expr::count_star().to_string(), "count(*)");
        assert_eq!(Expr::field("friend").member("name").default_alias(), "friend.name");
    }

    #[test]
    fn conjunctions_flatten() {
        let expr = Expr::field("a").eq(1).and(Expr::field("b").eq(2).and(Expr::field("c").eq(3)));
        assert_eq!(expr.into_conjuncts().len(), 3);
        assert!(Expr::count_star().has_aggregate());
        assert!(!Expr::param("x").refers_to_row());
    }
}

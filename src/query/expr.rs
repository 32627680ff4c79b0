#![forbid(unsafe_code)]

//! Expression evaluation against rows, pattern bindings and the command context.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use time::macros::format_description;

use crate::query::ast::{BinaryOp, Expr, UnaryOp};
use crate::query::context::CommandContext;
use crate::query::row::ResultRow;
use crate::query::value::Value;
use crate::types::{PenumbraError, Result};

/// Name bindings visible to an expression besides the command context.
#[derive(Clone, Copy, Default)]
pub struct Scope<'a> {
    row: Option<&'a ResultRow>,
    locals: Option<&'a BTreeMap<String, Value>>,
}

impl<'a> Scope<'a> {
    /// Scope with neither a current row nor local variables.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row(row: &'a ResultRow) -> Self {
        Self {
            row: Some(row),
            locals: None,
        }
    }

    /// Adds variables that shadow context variables (`$depth`, `$matched`, ...).
    pub fn with_locals(mut self, locals: &'a BTreeMap<String, Value>) -> Self {
        self.locals = Some(locals);
        self
    }

    fn variable(&self, name: &str, ctx: &CommandContext) -> Value {
        if let Some(value) = self.locals.and_then(|locals| locals.get(name)) {
            return value.clone();
        }
        if name == "current" || name == "currentMatch" {
            return self.row.map_or(Value::Null, row_to_value);
        }
        if let Some(value) = self.row.and_then(|row| row.metadata(name)) {
            return value.clone();
        }
        ctx.variable(name).cloned().unwrap_or(Value::Null)
    }
}

/// Element rows become links, anything else an embedded document.
pub fn row_to_value(row: &ResultRow) -> Value {
    match row.identity() {
        Some(rid) => Value::Link(rid),
        None => Value::Embedded(row.properties().clone()),
    }
}

/// Evaluates a predicate; anything but boolean `true` rejects.
pub fn eval_predicate(expr: &Expr, scope: &Scope<'_>, ctx: &CommandContext) -> Result<bool> {
    Ok(eval(expr, scope, ctx)?.is_true())
}

/// Evaluates an expression to a value.
pub fn eval(expr: &Expr, scope: &Scope<'_>, ctx: &CommandContext) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Param(name) => ctx.param(name),
        Expr::Field(name) => Ok(scope
            .row
            .map_or(Value::Null, |row| row.attribute(name))),
        Expr::Variable(name) => Ok(scope.variable(name, ctx)),
        Expr::Member(base, name) => {
            let base = eval(base, scope, ctx)?;
            member(&base, name, ctx)
        }
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, scope, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Expr::Unary(op, inner) => unary(*op, eval(inner, scope, ctx)?),
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, scope, ctx)?;
            let rhs = eval(rhs, scope, ctx)?;
            binary(*op, &lhs, &rhs)
        }
        Expr::And(terms) => {
            for term in terms {
                if !eval_predicate(term, scope, ctx)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        Expr::Or(terms) => {
            for term in terms {
                if eval_predicate(term, scope, ctx)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        Expr::IsNull(inner) => Ok(Value::Bool(eval(inner, scope, ctx)?.is_null())),
        Expr::IsNotNull(inner) => Ok(Value::Bool(!eval(inner, scope, ctx)?.is_null())),
        Expr::Between(value, low, high) => {
            let value = eval(value, scope, ctx)?;
            let low = eval(low, scope, ctx)?;
            let high = eval(high, scope, ctx)?;
            let above = matches!(value.compare(&low)?, Some(Ordering::Greater | Ordering::Equal));
            let below = matches!(value.compare(&high)?, Some(Ordering::Less | Ordering::Equal));
            Ok(Value::Bool(above && below))
        }
        Expr::Function { name, args } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, scope, ctx))
                .collect::<Result<Vec<_>>>()?;
            call_function(name, args)
        }
        Expr::SubQuery(statement) => {
            let rows = crate::query::executor::run_nested(statement, ctx, scope.row)?;
            Ok(Value::List(rows.iter().map(subquery_value).collect()))
        }
    }
}

fn subquery_value(row: &ResultRow) -> Value {
    if row.is_element() {
        return row_to_value(row);
    }
    let mut props = row.properties().values();
    match (props.next(), props.next()) {
        (Some(single), None) => single.clone(),
        _ => row_to_value(row),
    }
}

/// Property access on links, documents and lists; anything else yields null.
pub fn member(base: &Value, name: &str, ctx: &CommandContext) -> Result<Value> {
    match base {
        Value::Link(rid) => Ok(ctx
            .fetch(*rid)?
            .map(ResultRow::from_record)
            .map_or(Value::Null, |row| row.attribute(name))),
        Value::Embedded(map) | Value::Map(map) => {
            Ok(map.get(name).cloned().unwrap_or(Value::Null))
        }
        Value::List(items) => items
            .iter()
            .map(|item| member(item, name, ctx))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        _ => Ok(Value::Null),
    }
}

fn unary(op: UnaryOp, value: Value) -> Result<Value> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Int(v)) => Ok(Value::Int(-v)),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Not, other) | (UnaryOp::Neg, other) => Err(PenumbraError::TypeMismatch(
            format!("operator not applicable to {}", other.type_name()),
        )),
    }
}

/// Applies a binary operator to two evaluated operands.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let ordered = |accept: fn(Ordering) -> bool| -> Result<Value> {
        Ok(Value::Bool(lhs.compare(rhs)?.is_some_and(accept)))
    };
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs.equals(rhs))),
        BinaryOp::Ne => Ok(Value::Bool(
            !lhs.is_null() && !rhs.is_null() && !lhs.equals(rhs),
        )),
        BinaryOp::Lt => ordered(|ord| ord == Ordering::Less),
        BinaryOp::Le => ordered(|ord| ord != Ordering::Greater),
        BinaryOp::Gt => ordered(|ord| ord == Ordering::Greater),
        BinaryOp::Ge => ordered(|ord| ord != Ordering::Less),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, lhs, rhs)
        }
        BinaryOp::In => Ok(Value::Bool(
            rhs.elements().into_iter().any(|item| lhs.equals(item)),
        )),
        BinaryOp::Contains => Ok(Value::Bool(match (lhs, rhs) {
            (Value::String(text), Value::String(needle)) => text.contains(needle.as_str()),
            _ => lhs.elements().into_iter().any(|item| item.equals(rhs)),
        })),
        BinaryOp::ContainsAny => {
            let wanted = rhs.elements();
            Ok(Value::Bool(lhs.elements().into_iter().any(|item| {
                wanted.iter().any(|candidate| item.equals(candidate))
            })))
        }
        BinaryOp::ContainsKey => Ok(Value::Bool(match (lhs, rhs) {
            (Value::Map(map) | Value::Embedded(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        })),
        BinaryOp::ContainsValue => Ok(Value::Bool(match lhs {
            Value::Map(map) | Value::Embedded(map) => map.values().any(|item| item.equals(rhs)),
            _ => false,
        })),
        BinaryOp::Like => Ok(Value::Bool(match (lhs, rhs) {
            (Value::String(text), Value::String(pattern)) => like_match(text, pattern),
            _ => false,
        })),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match (lhs, rhs) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::String(a), b) if op == BinaryOp::Add => Ok(Value::String(format!("{a}{b}"))),
        (a, Value::String(b)) if op == BinaryOp::Add => Ok(Value::String(format!("{a}{b}"))),
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(*b),
                BinaryOp::Sub => a.checked_sub(*b),
                BinaryOp::Mul => a.checked_mul(*b),
                BinaryOp::Div if *b == 0 => return Err(division_by_zero()),
                BinaryOp::Div => a.checked_div(*b),
                BinaryOp::Mod if *b == 0 => return Err(division_by_zero()),
                BinaryOp::Mod => a.checked_rem(*b),
                _ => None,
            };
            result.map(Value::Int).ok_or_else(|| {
                PenumbraError::TypeMismatch(format!("integer overflow in {a} and {b}"))
            })
        }
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Ok(Value::Float(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            })),
            _ => Err(PenumbraError::TypeMismatch(format!(
                "arithmetic on {} and {}",
                lhs.type_name(),
                rhs.type_name()
            ))),
        },
    }
}

fn division_by_zero() -> PenumbraError {
    PenumbraError::CommandExecution("division by zero".into())
}

/// SQL LIKE with `%` (any run) and `_` (one character).
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

fn call_function(name: &str, args: Vec<Value>) -> Result<Value> {
    let lowered = name.to_ascii_lowercase();
    match lowered.as_str() {
        "coalesce" | "ifnull" => Ok(args
            .into_iter()
            .find(|value| !value.is_null())
            .unwrap_or(Value::Null)),
        "size" => Ok(match args.first() {
            Some(Value::List(items)) => Value::Int(items.len() as i64),
            Some(Value::Map(map)) | Some(Value::Embedded(map)) => Value::Int(map.len() as i64),
            Some(Value::String(text)) => Value::Int(text.chars().count() as i64),
            Some(Value::Null) | None => Value::Int(0),
            Some(_) => Value::Int(1),
        }),
        "date" => match args.first() {
            Some(Value::String(text)) => parse_datetime(text).map(Value::DateTime),
            Some(Value::Int(ms)) => Ok(Value::DateTime(*ms)),
            Some(Value::DateTime(ms)) => Ok(Value::DateTime(*ms)),
            _ => Ok(Value::Null),
        },
        "sysdate" => {
            let now = time::OffsetDateTime::now_utc();
            Ok(Value::DateTime((now.unix_timestamp_nanos() / 1_000_000) as i64))
        }
        other if crate::query::ast::AGGREGATE_FUNCTIONS.contains(&other) => {
            Err(PenumbraError::CommandExecution(format!(
                "aggregate function {other}() used outside a projection"
            )))
        }
        other => Err(PenumbraError::CommandExecution(format!(
            "unknown function {other}()"
        ))),
    }
}

/// Parses `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS` (UTC) into epoch milliseconds.
pub fn parse_datetime(text: &str) -> Result<i64> {
    let invalid = |err: time::error::Parse| {
        PenumbraError::TypeMismatch(format!("invalid date literal '{text}': {err}"))
    };
    let datetime = if text.len() > 10 {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        time::PrimitiveDateTime::parse(text, format).map_err(invalid)?
    } else {
        let format = format_description!("[year]-[month]-[day]");
        time::Date::parse(text, format).map_err(invalid)?.midnight()
    };
    Ok((datetime.assume_utc().unix_timestamp_nanos() / 1_000_000) as i64)
}

//! Index selection over the terms of a WHERE clause.
//!
//! A conjunction is split into terms; each `field <op> constant` term is a
//! candidate search argument. For every index on the target class the
//! longest chain of equality terms over its leading fields is matched,
//! optionally followed by one range over the next field. The index using the
//! most fields wins; among equals a fully-bound unique index is preferred,
//! and remaining ties keep the first index declared.
//!
//! Value indexes key lists and maps per element, so a value-index lookup
//! only narrows the candidates: its terms stay in the residual filter.

use std::ops::Bound;

use crate::query::ast::{BinaryOp, Expr, SortDirection};
use crate::query::gateway::ScanOrder;
use crate::query::metadata::{IndexBy, IndexDef};
use crate::query::step::IndexKey;
use crate::query::value::Value;

/// Search argument extracted from one conjunct.
#[derive(Clone, Debug)]
enum Sarg {
    Eq(Expr),
    Lower(Bound<Expr>),
    Upper(Bound<Expr>),
    Between(Expr, Expr),
    In(Expr),
    /// Any element equal to any of the listed values.
    AnyElement(Expr),
    ContainsKey(Expr),
    ContainsValue(Expr),
}

#[derive(Clone, Debug)]
struct Term {
    conjunct: usize,
    field: String,
    sarg: Sarg,
}

fn plain_field(expr: &Expr) -> Option<&str> {
    expr.field_name().filter(|name| !name.starts_with('@'))
}

fn classify(conjunct: usize, expr: &Expr) -> Option<Term> {
    let (field, sarg) = match expr {
        Expr::Binary(op, lhs, rhs) => {
            let (field, op, value) = match (plain_field(lhs), plain_field(rhs)) {
                (Some(field), _) if rhs.is_constant() => (field, *op, rhs.as_ref()),
                (None, Some(field)) if lhs.is_constant() => (field, op.flipped()?, lhs.as_ref()),
                _ => return None,
            };
            let value = value.clone();
            let sarg = match op {
                BinaryOp::Eq => Sarg::Eq(value),
                BinaryOp::Lt => Sarg::Upper(Bound::Excluded(value)),
                BinaryOp::Le => Sarg::Upper(Bound::Included(value)),
                BinaryOp::Gt => Sarg::Lower(Bound::Excluded(value)),
                BinaryOp::Ge => Sarg::Lower(Bound::Included(value)),
                BinaryOp::In => Sarg::In(value),
                BinaryOp::ContainsAny => Sarg::AnyElement(value),
                // a string needle means substring search, which no key answers
                BinaryOp::Contains => match value {
                    Expr::Literal(Value::String(_)) | Expr::Param(_) => return None,
                    needle => Sarg::AnyElement(Expr::List(vec![needle])),
                },
                BinaryOp::ContainsKey => Sarg::ContainsKey(value),
                BinaryOp::ContainsValue => Sarg::ContainsValue(value),
                _ => return None,
            };
            (field, sarg)
        }
        Expr::Between(value, low, high) if low.is_constant() && high.is_constant() => {
            let field = plain_field(value)?;
            (field, Sarg::Between(low.as_ref().clone(), high.as_ref().clone()))
        }
        _ => return None,
    };
    Some(Term {
        conjunct,
        field: field.to_owned(),
        sarg,
    })
}

/// Index lookup chosen for a conjunction.
#[derive(Clone, Debug)]
pub(crate) struct IndexChoice {
    pub index: IndexDef,
    pub key: IndexKey,
    /// Leading index fields bound by equality.
    pub eq_len: usize,
    /// Index fields constrained by the lookup.
    pub used: usize,
    /// Conjuncts fully answered by the lookup. Only map-index terms qualify.
    pub consumed: Vec<usize>,
}

impl IndexChoice {
    fn full_unique(&self) -> bool {
        self.index.is_unique() && self.eq_len == self.index.fields.len()
    }

    /// True when rows come back in composite key order.
    fn key_ordered(&self) -> bool {
        matches!(
            self.key,
            IndexKey::Equals(_) | IndexKey::Prefix(_) | IndexKey::Range { .. } | IndexKey::All
        )
    }

    /// Scan order that makes the lookup satisfy `order`, if any.
    ///
    /// The order fields must appear contiguously in the index at a position
    /// no later than the end of the equality prefix, all in one direction.
    pub fn order_for(&self, order: &[(String, SortDirection)]) -> Option<ScanOrder> {
        if !self.key_ordered() {
            return None;
        }
        let direction = uniform_direction(order)?;
        let fields = &self.index.fields;
        let m = order.len();
        let aligned = (0..=self.eq_len).any(|start| {
            start + m <= fields.len()
                && fields[start..start + m]
                    .iter()
                    .zip(order)
                    .all(|(field, (name, _))| field == name)
        });
        aligned.then_some(direction)
    }

    /// Conjuncts the lookup does not answer, in their original order.
    pub fn residual(&self, conjuncts: &[Expr]) -> Option<Expr> {
        let rest = conjuncts
            .iter()
            .enumerate()
            .filter(|(idx, _)| !self.consumed.contains(idx))
            .map(|(_, expr)| expr.clone())
            .collect();
        Expr::conjunction(rest)
    }
}

fn uniform_direction(order: &[(String, SortDirection)]) -> Option<ScanOrder> {
    let (_, first) = order.first()?;
    if order.iter().any(|(_, direction)| direction != first) {
        return None;
    }
    Some(match first {
        SortDirection::Asc => ScanOrder::Ascending,
        SortDirection::Desc => ScanOrder::Descending,
    })
}

fn match_value_index(index: &IndexDef, terms: &[Term]) -> Option<IndexChoice> {
    let mut matched = Vec::new();
    let mut prefix = Vec::new();
    for field in &index.fields {
        let found = terms.iter().find(|term| {
            &term.field == field
                && matches!(term.sarg, Sarg::Eq(_))
                && !matched.contains(&term.conjunct)
        });
        match found {
            Some(Term {
                conjunct,
                sarg: Sarg::Eq(value),
                ..
            }) => {
                matched.push(*conjunct);
                prefix.push(value.clone());
            }
            _ => break,
        }
    }
    let eq_len = prefix.len();
    let next_field = index.fields.get(eq_len);
    let mut lower = Bound::Unbounded;
    let mut upper = Bound::Unbounded;
    if let Some(field) = next_field {
        for term in terms.iter().filter(|term| &term.field == field) {
            match &term.sarg {
                Sarg::Between(low, high)
                    if matches!(lower, Bound::Unbounded) && matches!(upper, Bound::Unbounded) =>
                {
                    lower = Bound::Included(low.clone());
                    upper = Bound::Included(high.clone());
                }
                Sarg::Lower(bound) if matches!(lower, Bound::Unbounded) => {
                    lower = bound.clone();
                }
                Sarg::Upper(bound) if matches!(upper, Bound::Unbounded) => {
                    upper = bound.clone();
                }
                _ => {}
            }
        }
    }
    let ranged = !matches!((&lower, &upper), (Bound::Unbounded, Bound::Unbounded));
    let key = if ranged {
        IndexKey::Range {
            prefix,
            lower,
            upper,
        }
    } else if eq_len == index.fields.len() {
        IndexKey::Equals(prefix)
    } else if eq_len > 0 {
        IndexKey::Prefix(prefix)
    } else if index.fields.len() == 1 {
        terms
            .iter()
            .filter(|term| term.field == index.fields[0])
            .find_map(|term| match &term.sarg {
                Sarg::In(values) | Sarg::AnyElement(values) => {
                    Some(IndexKey::ContainsAny(values.clone()))
                }
                _ => None,
            })?
    } else {
        return None;
    };
    Some(IndexChoice {
        index: index.clone(),
        key,
        eq_len,
        used: eq_len + usize::from(ranged || eq_len == 0),
        consumed: Vec::new(),
    })
}

fn match_map_index(index: &IndexDef, terms: &[Term]) -> Option<IndexChoice> {
    let [field] = index.fields.as_slice() else {
        return None;
    };
    terms
        .iter()
        .filter(|term| &term.field == field)
        .find_map(|term| {
            let key = match (&term.sarg, index.by) {
                (Sarg::ContainsKey(value), IndexBy::Key) => IndexKey::ContainsKey(value.clone()),
                (Sarg::ContainsValue(value), IndexBy::MapValue) => {
                    IndexKey::ContainsValue(value.clone())
                }
                _ => return None,
            };
            Some(IndexChoice {
                index: index.clone(),
                key,
                eq_len: 0,
                used: 1,
                consumed: vec![term.conjunct],
            })
        })
}

/// Picks the best index for a conjunction, if any index is usable.
pub(crate) fn choose_index(indexes: &[IndexDef], conjuncts: &[Expr]) -> Option<IndexChoice> {
    let terms: Vec<Term> = conjuncts
        .iter()
        .enumerate()
        .filter_map(|(idx, expr)| classify(idx, expr))
        .collect();
    if terms.is_empty() {
        return None;
    }
    let mut best: Option<IndexChoice> = None;
    for index in indexes {
        let candidate = match index.by {
            IndexBy::Value => match_value_index(index, &terms),
            IndexBy::Key | IndexBy::MapValue => match_map_index(index, &terms),
        };
        let Some(candidate) = candidate else {
            continue;
        };
        let better = match &best {
            None => true,
            Some(current) => {
                (candidate.used, candidate.full_unique()) > (current.used, current.full_unique())
            }
        };
        if better {
            best = Some(candidate);
        }
    }
    best
}

/// Index whose leading fields yield `order` on a full scan.
pub(crate) fn order_index(
    indexes: &[IndexDef],
    order: &[(String, SortDirection)],
) -> Option<(IndexDef, ScanOrder)> {
    let direction = uniform_direction(order)?;
    indexes
        .iter()
        .find(|index| {
            index.by == IndexBy::Value
                && index.fields.len() >= order.len()
                && index.fields.iter().zip(order).all(|(field, (name, _))| field == name)
        })
        .map(|index| (index.clone(), direction))
}

//! Graph traversal primitives shared by the matcher and the NOT-pattern filter.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::query::ast::Expr;
use crate::query::context::CommandContext;
use crate::query::expr::{eval_predicate, Scope};
use crate::query::gateway::Direction;
use crate::query::row::ResultRow;
use crate::query::value::Value;
use crate::types::{RecordId, Result};

/// Path of a recursive traversal: every node after the start, in order.
pub(crate) type TraversalPath = SmallVec<[RecordId; 8]>;

/// Traversal function of a pattern item.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Method {
    Out,
    In,
    Both,
    OutE,
    InE,
    BothE,
    OutV,
    InV,
    BothV,
}

impl Method {
    /// `None` for a function the engine does not know; such items match nothing.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "out" => Method::Out,
            "in" => Method::In,
            "both" => Method::Both,
            "outE" => Method::OutE,
            "inE" => Method::InE,
            "bothE" => Method::BothE,
            "outV" => Method::OutV,
            "inV" => Method::InV,
            "bothV" => Method::BothV,
            _ => return None,
        })
    }

    /// Vertex-to-vertex hops can be walked backwards.
    pub fn is_reversible(self) -> bool {
        matches!(self, Method::Out | Method::In | Method::Both)
    }

    pub fn reversed(self) -> Self {
        match self {
            Method::Out => Method::In,
            Method::In => Method::Out,
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Out => "out",
            Method::In => "in",
            Method::Both => "both",
            Method::OutE => "outE",
            Method::InE => "inE",
            Method::BothE => "bothE",
            Method::OutV => "outV",
            Method::InV => "inV",
            Method::BothV => "bothV",
        }
    }
}

/// Class, identity and predicate constraints on the node bound to an alias.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct NodeConstraint {
    pub class: Option<String>,
    pub rid: Option<RecordId>,
    pub filter: Option<Expr>,
}

impl NodeConstraint {
    pub fn is_empty(&self) -> bool {
        self.class.is_none() && self.rid.is_none() && self.filter.is_none()
    }
}

/// One hop (or recursive expansion) of a pattern.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Hop {
    pub method: Option<Method>,
    pub labels: Vec<String>,
    pub while_clause: Option<Expr>,
    pub max_depth: Option<u32>,
}

impl Hop {
    pub fn is_recursive(&self) -> bool {
        self.while_clause.is_some() || self.max_depth.is_some()
    }

    pub fn describe(&self, forward: bool) -> String {
        let method = match self.method {
            Some(method) if forward => method.name(),
            Some(method) => method.reversed().name(),
            None => "?",
        };
        let mut text = format!("{method}({})", self.labels.join(", "));
        if let Some(max) = self.max_depth {
            text.push_str(&format!(" maxDepth {max}"));
        }
        if let Some(condition) = &self.while_clause {
            text.push_str(&format!(" while {condition}"));
        }
        text
    }
}

/// Record access for traversals: an LRU of loaded rows plus memoised class
/// checks, both scoped to one step.
pub(crate) struct Traverser {
    rows: LruCache<RecordId, Option<ResultRow>>,
    subclass: FxHashMap<(String, String), bool>,
}

impl Traverser {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            rows: LruCache::new(capacity),
            subclass: FxHashMap::default(),
        }
    }

    pub fn row(&mut self, rid: RecordId, ctx: &CommandContext) -> Result<Option<ResultRow>> {
        if let Some(row) = self.rows.get(&rid) {
            return Ok(row.clone());
        }
        let row = ctx.fetch(rid)?.map(ResultRow::from_record);
        self.rows.put(rid, row.clone());
        Ok(row)
    }

    fn is_subclass(&mut self, class: &str, ancestor: &str, ctx: &CommandContext) -> Result<bool> {
        let key = (class.to_owned(), ancestor.to_owned());
        if let Some(known) = self.subclass.get(&key) {
            return Ok(*known);
        }
        let known = ctx.gateway().is_subclass_of(class, ancestor)?;
        self.subclass.insert(key, known);
        Ok(known)
    }

    /// Evaluates `expr` with `rid` as the current record and the pattern
    /// variables (`$matched`, `$depth`) in scope.
    pub fn eval_on(
        &mut self,
        expr: &Expr,
        rid: RecordId,
        depth: u32,
        matched: &Value,
        ctx: &CommandContext,
    ) -> Result<bool> {
        let Some(row) = self.row(rid, ctx)? else {
            return Ok(false);
        };
        let locals = pattern_locals(matched, depth);
        eval_predicate(expr, &Scope::row(&row).with_locals(&locals), ctx)
    }

    /// True when `rid` exists and satisfies the constraint.
    pub fn accepts(
        &mut self,
        constraint: &NodeConstraint,
        rid: RecordId,
        depth: u32,
        matched: &Value,
        ctx: &CommandContext,
    ) -> Result<bool> {
        if constraint.rid.is_some_and(|wanted| wanted != rid) {
            return Ok(false);
        }
        let Some(row) = self.row(rid, ctx)? else {
            return Ok(false);
        };
        if let Some(class) = &constraint.class {
            let Some(actual) = row.class_name() else {
                return Ok(false);
            };
            if !self.is_subclass(actual, class, ctx)? {
                return Ok(false);
            }
        }
        match &constraint.filter {
            Some(filter) => {
                let locals = pattern_locals(matched, depth);
                eval_predicate(filter, &Scope::row(&row).with_locals(&locals), ctx)
            }
            None => Ok(true),
        }
    }

    /// Records one hop away from `rid`.
    pub fn neighbors(
        &mut self,
        rid: RecordId,
        method: Method,
        labels: &[String],
        ctx: &CommandContext,
    ) -> Result<Vec<RecordId>> {
        let gateway = ctx.gateway();
        let (direction, edges) = match method {
            Method::Out => (Direction::Out, false),
            Method::In => (Direction::In, false),
            Method::Both => (Direction::Both, false),
            Method::OutE => (Direction::Out, true),
            Method::InE => (Direction::In, true),
            Method::BothE => (Direction::Both, true),
            Method::OutV | Method::InV | Method::BothV => {
                let Some(row) = self.row(rid, ctx)? else {
                    return Ok(Vec::new());
                };
                let ends: &[&str] = match method {
                    Method::OutV => &["out"],
                    Method::InV => &["in"],
                    _ => &["out", "in"],
                };
                return Ok(ends
                    .iter()
                    .filter_map(|end| row.property(end).and_then(Value::as_link))
                    .collect());
            }
        };
        Ok(gateway
            .edges(rid, direction, labels)?
            .into_iter()
            .map(|neighbor| if edges { neighbor.edge } else { neighbor.vertex })
            .collect())
    }
}

/// Variables a pattern predicate sees besides the record itself.
pub(crate) fn pattern_locals(matched: &Value, depth: u32) -> BTreeMap<String, Value> {
    let mut locals = BTreeMap::new();
    locals.insert("matched".to_owned(), matched.clone());
    locals.insert("depth".to_owned(), Value::Int(i64::from(depth)));
    locals
}

/// A record reached by a traversal.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Reached {
    pub rid: RecordId,
    pub depth: u32,
    pub path: TraversalPath,
}

/// Lazy depth-first expansion of one hop from a bound record.
///
/// A plain hop yields the direct neighbours at depth 1. A recursive hop
/// yields the start record at depth 0 and then every record reachable while
/// `while` holds and `maxDepth` is not exceeded; a record whose `while`
/// fails is still yielded but not expanded. No visited set is kept, so
/// termination on cyclic graphs rests on `while`/`maxDepth` alone.
pub(crate) struct TraversalCursor {
    hop: Hop,
    method: Option<Method>,
    start: Option<RecordId>,
    stack: Vec<Reached>,
}

impl TraversalCursor {
    pub fn new(start: RecordId, hop: &Hop, forward: bool) -> Self {
        let method = hop
            .method
            .map(|method| if forward { method } else { method.reversed() });
        Self {
            hop: hop.clone(),
            method,
            start: Some(start),
            stack: Vec::new(),
        }
    }

    fn push_children(
        &mut self,
        from: &Reached,
        traverser: &mut Traverser,
        ctx: &CommandContext,
    ) -> Result<()> {
        let Some(method) = self.method else {
            return Ok(());
        };
        let next = traverser.neighbors(from.rid, method, &self.hop.labels, ctx)?;
        for rid in next.into_iter().rev() {
            let mut path = from.path.clone();
            path.push(rid);
            self.stack.push(Reached {
                rid,
                depth: from.depth + 1,
                path,
            });
        }
        Ok(())
    }

    fn should_expand(
        &self,
        reached: &Reached,
        traverser: &mut Traverser,
        matched: &Value,
        ctx: &CommandContext,
    ) -> Result<bool> {
        if self.hop.max_depth.is_some_and(|max| reached.depth >= max) {
            return Ok(false);
        }
        match &self.hop.while_clause {
            Some(condition) => traverser.eval_on(condition, reached.rid, reached.depth, matched, ctx),
            None => Ok(true),
        }
    }

    pub fn next(
        &mut self,
        traverser: &mut Traverser,
        matched: &Value,
        ctx: &CommandContext,
    ) -> Result<Option<Reached>> {
        if let Some(start) = self.start.take() {
            let origin = Reached {
                rid: start,
                depth: 0,
                path: TraversalPath::new(),
            };
            if self.hop.is_recursive() {
                self.stack.push(origin);
            } else {
                self.push_children(&origin, traverser, ctx)?;
            }
        }
        let Some(reached) = self.stack.pop() else {
            return Ok(None);
        };
        if self.hop.is_recursive() && self.should_expand(&reached, traverser, matched, ctx)? {
            self.push_children(&reached, traverser, ctx)?;
        }
        Ok(Some(reached))
    }
}

//! SELECT planning and the projection/sort/window tail shared with MATCH.

use crate::query::ast::{
    Expr, LetItem, LetValue, OrderItem, ProjectionItem, SelectStatement, SortDirection, Target,
};
use crate::query::gateway::ScanOrder;
use crate::query::planner::{choose_index, order_index, Planner};
use crate::query::step::{
    AggregateStep, BoxStep, DistinctStep, FetchFromClassStep, FetchFromClusterStep,
    FetchFromIndexStep, FetchFromRidsStep, FilterStep, GlobalLetStep, IndexKey, LetStep,
    LimitStep, NoTargetStep, OrderByStep, ParallelExecStep, ProjectionStep, SkipStep,
    SubQueryStep,
};
use crate::query::value::Value;
use crate::types::Result;

/// Source step plus whatever part of WHERE it leaves to a filter.
pub(crate) struct Sourced {
    pub step: BoxStep,
    pub residual: Option<Expr>,
    /// True when the source already yields the requested order.
    pub sorted: bool,
}

impl Sourced {
    fn unsorted(step: BoxStep, residual: Option<Expr>) -> Self {
        Self {
            step,
            residual,
            sorted: false,
        }
    }

    /// Source with its residual filter applied.
    pub fn filtered(self) -> BoxStep {
        match self.residual {
            Some(predicate) => Box::new(FilterStep::new(self.step, predicate)),
            None => self.step,
        }
    }
}

/// How rows of a class are fetched.
#[derive(Clone, Debug)]
pub(crate) enum AccessPath {
    Scan { class: String, polymorphic: bool },
    Lookup {
        index: String,
        key: IndexKey,
        order: ScanOrder,
    },
    /// One lookup per OR branch, each with its own residual filter.
    Branches(Vec<(String, IndexKey, Option<Expr>)>),
}

/// Planned class source. Plain data: a caller opening the same source many
/// times plans it once and builds fresh steps from it.
#[derive(Clone, Debug)]
pub(crate) struct ClassPlan {
    pub path: AccessPath,
    pub residual: Option<Expr>,
    pub sorted: bool,
}

impl ClassPlan {
    pub fn build(&self) -> Sourced {
        let step: BoxStep = match &self.path {
            AccessPath::Scan { class, polymorphic } => {
                Box::new(FetchFromClassStep::new(class.clone(), *polymorphic))
            }
            AccessPath::Lookup { index, key, order } => {
                Box::new(FetchFromIndexStep::new(index.clone(), key.clone(), *order))
            }
            AccessPath::Branches(lookups) => {
                let branches = lookups
                    .iter()
                    .map(|(index, key, residual)| {
                        let lookup: BoxStep = Box::new(FetchFromIndexStep::new(
                            index.clone(),
                            key.clone(),
                            ScanOrder::Ascending,
                        ));
                        match residual {
                            Some(predicate) => {
                                Box::new(FilterStep::new(lookup, predicate.clone())) as BoxStep
                            }
                            None => lookup,
                        }
                    })
                    .collect();
                Box::new(ParallelExecStep::new(branches))
            }
        };
        Sourced {
            step,
            residual: self.residual.clone(),
            sorted: self.sorted,
        }
    }
}

/// Everything that runs after the filtered source: projection or
/// aggregation, DISTINCT, ORDER BY, SKIP and LIMIT.
pub(crate) struct Tail<'s> {
    pub projection: &'s [ProjectionItem],
    pub distinct: bool,
    pub group_by: &'s [Expr],
    pub order_by: &'s [OrderItem],
    pub skip: Option<&'s Expr>,
    pub limit: Option<&'s Expr>,
}

impl<'s> Tail<'s> {
    fn from_select(select: &'s SelectStatement) -> Self {
        Self {
            projection: &select.projection,
            distinct: select.distinct,
            group_by: &select.group_by,
            order_by: &select.order_by,
            skip: select.skip.as_ref(),
            limit: select.limit.as_ref(),
        }
    }

    fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty() || self.projection.iter().any(|item| item.expr.has_aggregate())
    }

    /// Projection item producing the output property `name`.
    fn projected(&self, name: &str) -> Option<&'s ProjectionItem> {
        self.projection
            .iter()
            .find(|item| item.output_name() == name)
    }

    /// ORDER BY rewritten against projection output, when every item can be
    /// answered from it.
    fn order_on_output(&self) -> Option<Vec<OrderItem>> {
        self.order_by
            .iter()
            .map(|item| {
                if let Some(name) = item.expr.field_name() {
                    if self.projected(name).is_some() {
                        return Some(item.clone());
                    }
                }
                self.projection
                    .iter()
                    .find(|projected| projected.expr == item.expr)
                    .map(|projected| OrderItem {
                        expr: Expr::field(projected.output_name()),
                        direction: item.direction,
                    })
            })
            .collect()
    }

    /// ORDER BY as plain source fields, when an index could provide it.
    fn source_order(&self) -> Option<Vec<(String, SortDirection)>> {
        if self.order_by.is_empty() || self.is_aggregate() {
            return None;
        }
        self.order_by
            .iter()
            .map(|item| {
                let name = item.expr.field_name()?;
                let source = match self.projected(name) {
                    Some(projected) if !self.projection.is_empty() => projected.expr.field_name()?,
                    _ => name,
                };
                (!source.starts_with('@')).then(|| (source.to_owned(), item.direction))
            })
            .collect()
    }

    /// SKIP + LIMIT when both are literals, the number of rows a sort must
    /// keep. A window that does not fit in `usize` means no window.
    fn window(&self) -> Option<usize> {
        let literal = |expr: Option<&Expr>, default: i64| match expr {
            None => Some(default),
            Some(Expr::Literal(Value::Int(n))) => Some(*n),
            Some(_) => None,
        };
        let limit = literal(self.limit, -1)?;
        let skip = literal(self.skip, 0)?;
        if limit < 0 || skip < 0 {
            return None;
        }
        skip.checked_add(limit)
            .and_then(|n| usize::try_from(n).ok())
    }
}

fn is_global(item: &LetItem) -> bool {
    match &item.value {
        LetValue::Expr(expr) => !expr.refers_to_row(),
        LetValue::Query(statement) => !statement.refers_to_parent(),
    }
}

impl Planner<'_> {
    pub(crate) fn plan_select(&self, select: &SelectStatement) -> Result<BoxStep> {
        let tail = Tail::from_select(select);
        let order = if self.config.enable_order_elimination {
            tail.source_order()
        } else {
            None
        };
        let sourced = self.plan_source(&select.target, select.where_clause.as_ref(), order.as_deref())?;
        let sorted = sourced.sorted;
        let mut step = sourced.step;
        let (global, per_row): (Vec<LetItem>, Vec<LetItem>) =
            select.lets.iter().cloned().partition(is_global);
        if !global.is_empty() {
            step = Box::new(GlobalLetStep::new(step, global));
        }
        if !per_row.is_empty() {
            step = Box::new(LetStep::new(step, per_row));
        }
        if let Some(predicate) = sourced.residual {
            step = Box::new(FilterStep::new(step, predicate));
        }
        self.plan_tail(step, &tail, sorted)
    }

    /// Chooses the record source for a target and WHERE clause.
    pub(crate) fn plan_source(
        &self,
        target: &Target,
        where_clause: Option<&Expr>,
        order: Option<&[(String, SortDirection)]>,
    ) -> Result<Sourced> {
        let residual = where_clause.cloned();
        match target {
            Target::None => Ok(Sourced::unsorted(Box::new(NoTargetStep::new()), residual)),
            Target::Cluster(cluster) => Ok(Sourced::unsorted(
                Box::new(FetchFromClusterStep::new(*cluster)),
                residual,
            )),
            Target::Rids(rids) => Ok(Sourced::unsorted(
                Box::new(FetchFromRidsStep::new(rids.clone())),
                residual,
            )),
            Target::SubQuery(statement) => Ok(Sourced::unsorted(
                Box::new(SubQueryStep::new(self.plan_step(statement)?)),
                residual,
            )),
            Target::Class { name, polymorphic } => Ok(self
                .plan_class(name, *polymorphic, where_clause, order)?
                .build()),
        }
    }

    /// Access path for a class target.
    pub(crate) fn plan_class(
        &self,
        class: &str,
        polymorphic: bool,
        where_clause: Option<&Expr>,
        order: Option<&[(String, SortDirection)]>,
    ) -> Result<ClassPlan> {
        self.gateway.require_class(class)?;
        let scan = || ClassPlan {
            path: AccessPath::Scan {
                class: class.to_owned(),
                polymorphic,
            },
            residual: where_clause.cloned(),
            sorted: false,
        };
        if !polymorphic || !self.config.enable_index_selection {
            return Ok(scan());
        }
        let indexes = self.gateway.class_indexes(class)?;
        if let Some(Expr::Or(branches)) = where_clause {
            return Ok(self.plan_disjunction(class, branches, &indexes).unwrap_or_else(scan));
        }
        let conjuncts = where_clause
            .map(|expr| expr.clone().into_conjuncts())
            .unwrap_or_default();
        if let Some(choice) = choose_index(&indexes, &conjuncts) {
            let scan_order = order.and_then(|order| {
                if !self.config.enable_order_elimination {
                    return None;
                }
                choice.order_for(order)
            });
            tracing::debug!(
                class,
                index = %choice.index.name,
                fields = choice.used,
                ordered = scan_order.is_some(),
                "index selected"
            );
            let residual = choice.residual(&conjuncts);
            return Ok(ClassPlan {
                path: AccessPath::Lookup {
                    index: choice.index.name,
                    key: choice.key,
                    order: scan_order.unwrap_or_default(),
                },
                residual,
                sorted: scan_order.is_some(),
            });
        }
        if let Some((index, scan_order)) = order.and_then(|order| order_index(&indexes, order)) {
            tracing::debug!(class, index = %index.name, "full index scan provides order");
            return Ok(ClassPlan {
                path: AccessPath::Lookup {
                    index: index.name,
                    key: IndexKey::All,
                    order: scan_order,
                },
                residual: where_clause.cloned(),
                sorted: true,
            });
        }
        Ok(scan())
    }

    /// OR over indexed branches runs one lookup per branch; a single
    /// unindexed branch degrades the whole disjunction to a class scan.
    fn plan_disjunction(
        &self,
        class: &str,
        branches: &[Expr],
        indexes: &[crate::query::metadata::IndexDef],
    ) -> Option<ClassPlan> {
        let mut lookups = Vec::with_capacity(branches.len());
        for branch in branches {
            let conjuncts = branch.clone().into_conjuncts();
            let Some(choice) = choose_index(indexes, &conjuncts) else {
                tracing::warn!(
                    class,
                    branch = %branch,
                    "disjunction branch has no usable index; falling back to class scan"
                );
                return None;
            };
            let residual = choice.residual(&conjuncts);
            lookups.push((choice.index.name, choice.key, residual));
        }
        tracing::debug!(class, branches = lookups.len(), "parallel index branches");
        Some(ClassPlan {
            path: AccessPath::Branches(lookups),
            residual: None,
            sorted: false,
        })
    }

    /// Appends projection, DISTINCT, ORDER BY, SKIP and LIMIT.
    pub(crate) fn plan_tail(&self, input: BoxStep, tail: &Tail<'_>, presorted: bool) -> Result<BoxStep> {
        let aggregate = tail.is_aggregate();
        let mut sort_before = None;
        let mut sort_after = None;
        if !presorted && !tail.order_by.is_empty() {
            if tail.projection.is_empty() {
                sort_after = Some(tail.order_by.to_vec());
            } else if let Some(rewritten) = tail.order_on_output() {
                sort_after = Some(rewritten);
            } else if aggregate {
                sort_after = Some(tail.order_by.to_vec());
            } else {
                sort_before = Some(tail.order_by.to_vec());
            }
        }
        let mut step = input;
        if let Some(items) = sort_before {
            let window = if tail.distinct { None } else { tail.window() };
            step = Box::new(OrderByStep::new(step, items, window));
        }
        if aggregate {
            step = Box::new(AggregateStep::new(
                step,
                tail.group_by.to_vec(),
                tail.projection.to_vec(),
            )?);
        } else if !tail.projection.is_empty() {
            step = Box::new(ProjectionStep::new(step, tail.projection.to_vec()));
        }
        if tail.distinct {
            step = Box::new(DistinctStep::new(step));
        }
        if let Some(items) = sort_after {
            step = Box::new(OrderByStep::new(step, items, tail.window()));
        }
        if let Some(skip) = tail.skip {
            step = Box::new(SkipStep::new(step, skip.clone()));
        }
        if let Some(limit) = tail.limit {
            step = Box::new(LimitStep::new(step, limit.clone()));
        }
        Ok(step)
    }
}

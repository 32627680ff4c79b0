//! Execution plans and their human-readable description.

use std::hash::Hasher;

use xxhash_rust::xxh64::Xxh64;

use crate::query::context::CommandContext;
use crate::query::profile::PlanProfile;
use crate::query::row::ResultRow;
use crate::query::step::{BoxStep, ExecutionStep};
use crate::types::Result;

/// Human-readable explain tree.
#[derive(Clone, Debug)]
pub struct PlanExplain {
    /// Root node of the explain tree
    pub root: ExplainNode,
    /// Deterministic hash of the plan shape.
    pub plan_hash: u64,
}

impl PlanExplain {
    /// Step names in pre-order.
    pub fn step_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        collect_names(&self.root, &mut names);
        names
    }

    /// True when some step in the plan has the given name.
    pub fn contains_step(&self, name: &str) -> bool {
        self.step_names().contains(&name)
    }

    /// First node with the given operator name, in pre-order.
    pub fn find(&self, name: &str) -> Option<&ExplainNode> {
        find_node(&self.root, name)
    }

    /// Indented multi-line rendering, one step per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_node(&self.root, 0, &mut out);
        out
    }
}

fn collect_names<'a>(node: &'a ExplainNode, out: &mut Vec<&'a str>) {
    out.push(&node.op);
    for input in &node.inputs {
        collect_names(input, out);
    }
}

fn find_node<'a>(node: &'a ExplainNode, name: &str) -> Option<&'a ExplainNode> {
    if node.op == name {
        return Some(node);
    }
    node.inputs.iter().find_map(|input| find_node(input, name))
}

fn render_node(node: &ExplainNode, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str("+ ");
    out.push_str(&node.op);
    for prop in &node.props {
        out.push(' ');
        out.push_str(&prop.key);
        out.push('=');
        out.push_str(&prop.value);
    }
    out.push('\n');
    for input in &node.inputs {
        render_node(input, depth + 1, out);
    }
}

/// Explain node representing a step with optional metadata.
#[derive(Clone, Debug)]
pub struct ExplainNode {
    /// Step name
    pub op: String,
    /// Additional properties describing the step
    pub props: Vec<ExplainProp>,
    /// Upstream steps
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a new explain node with the given step name.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Value of a property, if present.
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.props
            .iter()
            .find(|prop| prop.key == key)
            .map(|prop| prop.value.as_str())
    }
}

/// Single property associated with an [`ExplainNode`].
#[derive(Clone, Debug)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value serialized for display.
    pub value: String,
    /// Whether this property contains literal data that may be redacted.
    pub redactable: bool,
}

impl ExplainProp {
    pub fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: false,
        }
    }

    pub fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: true,
        }
    }
}

/// Plan built for one command execution. Owns every step through its root.
pub struct ExecutionPlan {
    root: BoxStep,
    statement: &'static str,
}

impl ExecutionPlan {
    pub fn new(root: BoxStep, statement: &'static str) -> Self {
        Self { root, statement }
    }

    /// Statement kind the plan was built for.
    pub fn statement(&self) -> &'static str {
        self.statement
    }

    pub fn start(&mut self, ctx: &mut CommandContext) -> Result<()> {
        self.root.start(ctx)
    }

    pub fn next(&mut self, ctx: &mut CommandContext) -> Result<Option<ResultRow>> {
        self.root.next(ctx)
    }

    /// Releases every step; safe to call repeatedly.
    pub fn close(&mut self) {
        self.root.close();
    }

    pub fn explain(&self) -> PlanExplain {
        let root = self.root.explain();
        let plan_hash = compute_plan_hash(&root);
        PlanExplain { root, plan_hash }
    }

    /// Per-step counters; empty unless profiling was enabled.
    pub fn profile(&self) -> PlanProfile {
        let mut profile = PlanProfile::default();
        collect_profile(self.root.as_ref(), &mut profile);
        profile
    }
}

fn collect_profile(step: &dyn ExecutionStep, out: &mut PlanProfile) {
    if let Some(profile) = step.core().profile() {
        out.steps.push((step.name().to_owned(), *profile));
    }
    for input in step.inputs() {
        collect_profile(input, out);
    }
}

fn compute_plan_hash(root: &ExplainNode) -> u64 {
    let mut hasher = Xxh64::new(0);
    hash_explain_node(root, &mut hasher);
    hasher.finish()
}

fn hash_explain_node(node: &ExplainNode, hasher: &mut Xxh64) {
    hasher.write(node.op.as_bytes());
    for prop in &node.props {
        // Profiling counters vary between runs of the same plan.
        if prop.key == "rows" || prop.key == "cost_ns" {
            continue;
        }
        hasher.write(prop.key.as_bytes());
        hasher.write(prop.value.as_bytes());
    }
    hasher.write_u64(node.inputs.len() as u64);
    for child in &node.inputs {
        hash_explain_node(child, hasher);
    }
}

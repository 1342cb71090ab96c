//! Graph model: typed workflow nodes, edges, and the validated workflow graph.

mod parse;

pub use parse::{parse, parse_value, validate, RawNode, RawWorkflow};

use crate::syntax;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

pub type NodeId = String;

/// Bounds for a node's executor timeout, in seconds.
pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Context key a decision node's executor writes its branch value to.
pub const BRANCH_DECISION_KEY: &str = "branch_decision";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A malformed workflow definition. Carries every violation found.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid workflow graph: {}", .violations.join("; "))]
pub struct GraphValidationError {
    pub violations: Vec<String>,
}

impl GraphValidationError {
    pub fn new(violation: impl Into<String>) -> Self {
        Self {
            violations: vec![violation.into()],
        }
    }

    pub(crate) fn from_violations(violations: Vec<String>) -> Result<(), Self> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self { violations })
        }
    }
}

// ---------------------------------------------------------------------------
// Node type & executor kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    End,
    Action,
    Decision,
}

impl NodeType {
    /// Map an explicit discriminator to a node type. There is no default.
    pub fn from_discriminator(raw: &str) -> Option<Self> {
        match raw {
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            "action" => Some(Self::Action),
            "decision" => Some(Self::Decision),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Action => "action",
            Self::Decision => "decision",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which executor runs a node's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// The payload is code, shipped as-is to the sandbox.
    Direct,
    /// The payload is a task description; code comes from the cache or the generator.
    Cached,
}

impl ExecutorKind {
    pub fn from_discriminator(raw: &str) -> Option<Self> {
        match raw {
            "direct" => Some(Self::Direct),
            "cached" => Some(Self::Cached),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Cached => "cached",
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TaskSpec: the executable part of Action / Decision nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    payload: String,
    executor: ExecutorKind,
    timeout_secs: u64,
}

impl TaskSpec {
    /// Build a task. Direct-sandbox code is syntax-checked here, once.
    pub fn new(
        payload: impl Into<String>,
        executor: ExecutorKind,
        timeout_secs: u64,
    ) -> Result<Self, GraphValidationError> {
        let payload = payload.into();
        let mut violations = Vec::new();

        if payload.trim().is_empty() {
            violations.push("payload must not be empty".to_string());
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&timeout_secs) {
            violations.push(format!(
                "timeout {timeout_secs}s outside {MIN_TIMEOUT_SECS}..={MAX_TIMEOUT_SECS}"
            ));
        }
        if executor == ExecutorKind::Direct && !payload.trim().is_empty() {
            if let Err(errors) = syntax::check(&payload) {
                violations.extend(errors.into_iter().map(|e| format!("syntax error: {e}")));
            }
        }

        GraphValidationError::from_violations(violations)?;
        Ok(Self {
            payload,
            executor,
            timeout_secs,
        })
    }

    /// Code (direct) or task description (cached).
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn executor(&self) -> ExecutorKind {
        self.executor
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Variant-specific part of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Start,
    End,
    Action(TaskSpec),
    Decision(TaskSpec),
}

/// One typed step of a workflow. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    id: NodeId,
    label: Option<String>,
    kind: NodeKind,
}

impl Node {
    pub fn new(
        id: impl Into<NodeId>,
        label: Option<String>,
        kind: NodeKind,
    ) -> Result<Self, GraphValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(GraphValidationError::new("node id must not be empty"));
        }
        Ok(Self { id, label, kind })
    }

    pub fn start(id: impl Into<NodeId>) -> Result<Self, GraphValidationError> {
        Self::new(id, None, NodeKind::Start)
    }

    pub fn end(id: impl Into<NodeId>) -> Result<Self, GraphValidationError> {
        Self::new(id, None, NodeKind::End)
    }

    pub fn action(id: impl Into<NodeId>, task: TaskSpec) -> Result<Self, GraphValidationError> {
        Self::new(id, None, NodeKind::Action(task))
    }

    pub fn decision(id: impl Into<NodeId>, task: TaskSpec) -> Result<Self, GraphValidationError> {
        Self::new(id, None, NodeKind::Decision(task))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Start => NodeType::Start,
            NodeKind::End => NodeType::End,
            NodeKind::Action(_) => NodeType::Action,
            NodeKind::Decision(_) => NodeType::Decision,
        }
    }

    /// The executable task, for Action and Decision nodes.
    pub fn task(&self) -> Option<&TaskSpec> {
        match &self.kind {
            NodeKind::Action(task) | NodeKind::Decision(task) => Some(task),
            NodeKind::Start | NodeKind::End => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    /// Branch guard, matched against the normalized decision string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn when(from: impl Into<NodeId>, to: impl Into<NodeId>, condition: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(condition.into()),
        }
    }

    /// The condition normalized the same way decision values are.
    pub fn normalized_condition(&self) -> Option<String> {
        self.condition.as_deref().map(normalize_branch_value)
    }

    /// Whether this edge is taken for the given (already normalized) decision.
    pub fn matches(&self, decision: &str) -> bool {
        self.normalized_condition().as_deref() == Some(decision)
    }
}

/// Lower-case and trim a branch string. `"True "` and `"TRUE"` both become `"true"`.
pub fn normalize_branch_value(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Normalize a decision output to the literal `"true"` / `"false"` convention.
///
/// Booleans and strings are accepted; anything else yields `None`.
pub fn normalize_decision(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::String(s) => Some(normalize_branch_value(s)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// WorkflowGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Assemble a graph, rejecting shape errors that make it unrunnable:
    /// duplicate ids, fan-out from non-decision nodes, unknown branch conditions.
    ///
    /// Start/End counts and edge endpoints are checked by [`validate`].
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Result<Self, GraphValidationError> {
        let mut violations = Vec::new();
        let mut map: HashMap<NodeId, Node> = HashMap::with_capacity(nodes.len());

        for node in nodes {
            if map.contains_key(node.id()) {
                violations.push(format!("duplicate node id '{}'", node.id()));
                continue;
            }
            map.insert(node.id.clone(), node);
        }

        let mut fan_out: HashMap<&str, usize> = HashMap::new();
        for edge in &edges {
            *fan_out.entry(edge.from.as_str()).or_default() += 1;

            if let Some(cond) = edge.normalized_condition() {
                if cond != "true" && cond != "false" {
                    violations.push(format!(
                        "edge {} -> {} has condition '{}', expected \"true\" or \"false\"",
                        edge.from,
                        edge.to,
                        edge.condition.as_deref().unwrap_or_default()
                    ));
                }
            }
        }

        let mut reported: HashSet<&str> = HashSet::new();
        for edge in &edges {
            let from = edge.from.as_str();
            let Some(node) = map.get(from) else { continue };
            if fan_out[from] > 1 && node.node_type() != NodeType::Decision && reported.insert(from) {
                violations.push(format!(
                    "{} node '{from}' has {} outgoing edges; only decision nodes may branch",
                    node.node_type(),
                    fan_out[from]
                ));
            }
        }

        GraphValidationError::from_violations(violations)?;
        Ok(Self { nodes: map, edges })
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.node_type() == node_type)
    }

    /// The unique Start node of a validated graph.
    pub fn start_node(&self) -> Option<&Node> {
        let mut starts = self.nodes_of_type(NodeType::Start);
        match (starts.next(), starts.next()) {
            (Some(start), None) => Some(start),
            _ => None,
        }
    }

    /// Outgoing edges of a node, in definition order.
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == id).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Workflow definition parsing and structural validation.

use super::{
    Edge, ExecutorKind, GraphValidationError, Node, NodeKind, NodeType, TaskSpec, WorkflowGraph,
    DEFAULT_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};

/// The on-the-wire workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWorkflow {
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNode {
    pub id: String,
    /// Explicit discriminator: start | end | action | decision.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    /// direct | cached. Defaults to direct for `code`, cached for `prompt`.
    #[serde(default)]
    pub executor: Option<String>,
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub label: Option<String>,
}

impl RawNode {
    fn into_node(self) -> Result<Node, GraphValidationError> {
        let Some(node_type) = NodeType::from_discriminator(&self.node_type) else {
            return Err(GraphValidationError::new(format!(
                "node '{}' has unknown type '{}'",
                self.id, self.node_type
            )));
        };

        let kind = match node_type {
            NodeType::Start => NodeKind::Start,
            NodeType::End => NodeKind::End,
            NodeType::Action => NodeKind::Action(self.task()?),
            NodeType::Decision => NodeKind::Decision(self.task()?),
        };

        Node::new(self.id, self.label, kind)
    }

    fn task(&self) -> Result<TaskSpec, GraphValidationError> {
        let prefix = |msg: String| format!("node '{}': {msg}", self.id);

        let (payload, inferred) = match (&self.code, &self.prompt) {
            (Some(code), None) => (code.clone(), ExecutorKind::Direct),
            (None, Some(prompt)) => (prompt.clone(), ExecutorKind::Cached),
            (Some(_), Some(_)) => {
                return Err(GraphValidationError::new(prefix(
                    "specify either 'code' or 'prompt', not both".into(),
                )))
            }
            (None, None) => {
                return Err(GraphValidationError::new(prefix(
                    "missing 'code' or 'prompt'".into(),
                )))
            }
        };

        let executor = match self.executor.as_deref() {
            None => inferred,
            Some(raw) => ExecutorKind::from_discriminator(raw).ok_or_else(|| {
                GraphValidationError::new(prefix(format!("unknown executor '{raw}'")))
            })?,
        };

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS as i64);
        let timeout = u64::try_from(timeout).unwrap_or(0);

        TaskSpec::new(payload, executor, timeout).map_err(|e| GraphValidationError {
            violations: e.violations.into_iter().map(prefix).collect(),
        })
    }
}

/// Parse a workflow definition from JSON text.
pub fn parse(raw: &str) -> Result<WorkflowGraph, GraphValidationError> {
    let raw: RawWorkflow = serde_json::from_str(raw)
        .map_err(|e| GraphValidationError::new(format!("malformed workflow definition: {e}")))?;
    from_raw(raw)
}

/// Parse a workflow definition from an already-decoded JSON value.
pub fn parse_value(raw: &serde_json::Value) -> Result<WorkflowGraph, GraphValidationError> {
    let raw = RawWorkflow::deserialize(raw)
        .map_err(|e| GraphValidationError::new(format!("malformed workflow definition: {e}")))?;
    from_raw(raw)
}

fn from_raw(raw: RawWorkflow) -> Result<WorkflowGraph, GraphValidationError> {
    let mut violations = Vec::new();
    let mut nodes = Vec::with_capacity(raw.nodes.len());

    for raw_node in raw.nodes {
        match raw_node.into_node() {
            Ok(node) => nodes.push(node),
            Err(e) => violations.extend(e.violations),
        }
    }

    match WorkflowGraph::new(nodes, raw.edges) {
        Ok(graph) if violations.is_empty() => Ok(graph),
        Ok(_) => Err(GraphValidationError { violations }),
        Err(e) => {
            violations.extend(e.violations);
            Err(GraphValidationError { violations })
        }
    }
}

/// Check a graph is runnable: exactly one Start, at least one End,
/// and every edge endpoint exists. All violations are reported together.
pub fn validate(graph: &WorkflowGraph) -> Result<(), GraphValidationError> {
    let mut violations = Vec::new();

    let starts = graph.nodes_of_type(NodeType::Start).count();
    if starts != 1 {
        violations.push(format!("expected exactly one start node, found {starts}"));
    }

    if graph.nodes_of_type(NodeType::End).count() == 0 {
        violations.push("expected at least one end node, found 0".to_string());
    }

    for edge in graph.edges() {
        for endpoint in [&edge.from, &edge.to] {
            if graph.node(endpoint).is_none() {
                violations.push(format!(
                    "edge {} -> {} references unknown node '{endpoint}'",
                    edge.from, edge.to
                ));
            }
        }
    }

    GraphValidationError::from_violations(violations)
}

//! nf-runner: Workflow graph engine with decision branching and traced execution.

pub mod config;
pub mod engine;
pub mod registry;
pub mod runtime;

pub use config::{ConfigError, EngineConfig};
pub use engine::GraphEngine;
pub use registry::ExecutorRegistry;
pub use runtime::Runtime;

use nf_core::graph::{ExecutorKind, NodeId};
use nf_executor::ExecutorError;
use thiserror::Error;

/// Why a run stopped before reaching an End node.
#[derive(Debug, Error)]
pub enum GraphExecutionError {
    #[error("node execution failed: node={node_id}, error={source}")]
    NodeExecution {
        node_id: NodeId,
        #[source]
        source: ExecutorError,
    },
    #[error("no executor registered for '{kind}' (node {node_id})")]
    NoExecutor { node_id: NodeId, kind: ExecutorKind },
    #[error("decision node {node_id} did not set branch_decision")]
    MissingDecision { node_id: NodeId },
    #[error("decision node {node_id} produced {value}, expected \"true\" or \"false\"")]
    InvalidDecision { node_id: NodeId, value: String },
    #[error("no edge from {node_id} matches decision \"{decision}\"")]
    UnmatchedDecision { node_id: NodeId, decision: String },
    #[error("node {node_id} has {count} outgoing edges but is not a decision")]
    AmbiguousEdges { node_id: NodeId, count: usize },
    #[error("iteration cap of {cap} node visits exceeded before {node_id}")]
    IterationCap { cap: usize, node_id: NodeId },
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),
}

impl GraphExecutionError {
    /// The node the run stopped at.
    pub fn node_id(&self) -> &str {
        match self {
            Self::NodeExecution { node_id, .. }
            | Self::NoExecutor { node_id, .. }
            | Self::MissingDecision { node_id }
            | Self::InvalidDecision { node_id, .. }
            | Self::UnmatchedDecision { node_id, .. }
            | Self::AmbiguousEdges { node_id, .. }
            | Self::IterationCap { node_id, .. }
            | Self::UnknownNode(node_id) => node_id,
        }
    }
}

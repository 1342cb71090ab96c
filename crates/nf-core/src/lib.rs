//! nf-core: Shared types for nodeflow
//!
//! This crate has zero internal crate dependencies and defines the
//! canonical types used across all other nf-* crates.

pub mod context;
pub mod graph;
pub mod syntax;
pub mod trace;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::context::{ContextMap, ExecutionContext, KeyClass};
    pub use crate::graph::{
        normalize_decision, parse, validate, Edge, ExecutorKind, GraphValidationError, Node,
        NodeId, NodeKind, NodeType, TaskSpec, WorkflowGraph, BRANCH_DECISION_KEY,
    };
    pub use crate::trace::{
        ExecutionTrace, PendingEntry, RunResult, RunStatus, RunSummary, TraceEntry, TraceSink,
        TraceStatus,
    };
}

//! Trace types: the audit record of every node a run visits.

use crate::context::ContextMap;
use crate::graph::{Node, NodeId, NodeType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failed,
}

// ---------------------------------------------------------------------------
// TraceEntry: one per visited node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    pub node_id: NodeId,
    pub node_type: NodeType,
    pub status: TraceStatus,
    pub input_context_snapshot: ContextMap,
    pub output_context_snapshot: ContextMap,
    /// Wall-clock seconds spent on the node.
    pub execution_time: f64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_taken: Option<NodeId>,
    /// Executor-reported details (cache hit, attempts, stdout, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A trace entry under construction. Finalized exactly once.
#[derive(Debug)]
pub struct PendingEntry {
    node_id: NodeId,
    node_type: NodeType,
    input: ContextMap,
    started_at: DateTime<Utc>,
    clock: Instant,
    decision_result: Option<String>,
    path_taken: Option<NodeId>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl PendingEntry {
    /// Open an entry as the node begins executing.
    pub fn begin(node: &Node, input: ContextMap) -> Self {
        Self {
            node_id: node.id().to_string(),
            node_type: node.node_type(),
            input,
            started_at: Utc::now(),
            clock: Instant::now(),
            decision_result: None,
            path_taken: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn set_decision(&mut self, decision: impl Into<String>) {
        self.decision_result = Some(decision.into());
    }

    pub fn set_path_taken(&mut self, next: impl Into<NodeId>) {
        self.path_taken = Some(next.into());
    }

    pub fn set_metadata(&mut self, metadata: serde_json::Map<String, serde_json::Value>) {
        self.metadata = metadata;
    }

    pub fn succeed(self, output: ContextMap) -> TraceEntry {
        self.finish(TraceStatus::Success, output, None)
    }

    pub fn fail(self, output: ContextMap, error: impl Into<String>) -> TraceEntry {
        self.finish(TraceStatus::Failed, output, Some(error.into()))
    }

    fn finish(self, status: TraceStatus, output: ContextMap, error: Option<String>) -> TraceEntry {
        TraceEntry {
            node_id: self.node_id,
            node_type: self.node_type,
            status,
            input_context_snapshot: self.input,
            output_context_snapshot: output,
            execution_time: self.clock.elapsed().as_secs_f64(),
            started_at: self.started_at,
            error_message: error,
            decision_result: self.decision_result,
            path_taken: self.path_taken,
            metadata: self.metadata,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionTrace: ordered, append-only
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ExecutionTrace {
    entries: Vec<TraceEntry>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TraceEntry> {
        self.entries.last()
    }

    /// Node ids in visit order.
    pub fn path(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.node_id.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Run-level records
// ---------------------------------------------------------------------------

/// Outcome of `execute_workflow`, in the shape callers receive it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub execution_id: Uuid,
    pub status: RunStatus,
    pub final_context: ContextMap,
    pub execution_trace: ExecutionTrace,
    pub nodes_executed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at_node: Option<NodeId>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn summary(&self, started_at: DateTime<Utc>) -> RunSummary {
        RunSummary {
            execution_id: self.execution_id,
            status: self.status,
            started_at,
            completed_at: Utc::now(),
            nodes_executed: self.nodes_executed,
            error: self.error.clone(),
            failed_at_node: self.failed_at_node.clone(),
        }
    }
}

/// One row per run for the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub execution_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub nodes_executed: usize,
    pub error: Option<String>,
    pub failed_at_node: Option<NodeId>,
}

// ---------------------------------------------------------------------------
// Persistence collaborator
// ---------------------------------------------------------------------------

/// Receives trace records as a run progresses.
///
/// The engine treats sinks as fire-and-forget: errors are logged and never
/// fail the run.
pub trait TraceSink: Send + Sync {
    fn record_entry(&self, execution_id: Uuid, entry: &TraceEntry) -> anyhow::Result<()>;

    fn record_run(&self, summary: &RunSummary) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

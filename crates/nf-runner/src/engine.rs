//! GraphEngine: drive a workflow graph node by node.
//!
//! One run is strictly sequential: select node -> execute -> merge context ->
//! append trace entry -> resolve next node, until a terminal node or the
//! iteration cap of `2 x node_count` visits.

use crate::registry::ExecutorRegistry;
use crate::GraphExecutionError;
use chrono::Utc;
use nf_core::context::{ContextMap, ExecutionContext};
use nf_core::graph::{
    normalize_decision, parse, validate, GraphValidationError, Node, NodeId, NodeKind, NodeType,
    WorkflowGraph, BRANCH_DECISION_KEY,
};
use nf_core::trace::{ExecutionTrace, PendingEntry, RunResult, RunStatus, TraceEntry, TraceSink};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub struct GraphEngine {
    executors: ExecutorRegistry,
    sink: Option<Arc<dyn TraceSink>>,
}

impl GraphEngine {
    pub fn new(executors: ExecutorRegistry) -> Self {
        Self {
            executors,
            sink: None,
        }
    }

    /// Stream trace entries and run summaries to a persistence sink.
    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }

    /// Parse, validate and execute a raw JSON workflow definition.
    pub async fn run_definition(
        &self,
        raw: &str,
        initial_context: ContextMap,
    ) -> Result<RunResult, GraphValidationError> {
        let graph = parse(raw)?;
        self.execute_workflow(&graph, initial_context).await
    }

    /// Validate and execute a workflow.
    ///
    /// Validation failures are returned as `Err` and nothing runs. Execution
    /// failures produce a `RunResult` with `status = failed`, the partial
    /// trace, and the context as of the last successful node.
    pub async fn execute_workflow(
        &self,
        graph: &WorkflowGraph,
        initial_context: ContextMap,
    ) -> Result<RunResult, GraphValidationError> {
        validate(graph)?;
        let start = graph
            .start_node()
            .ok_or_else(|| GraphValidationError::new("workflow must have exactly one start node"))?;

        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        let cap = 2 * graph.node_count();
        let mut context = ExecutionContext::new(initial_context);
        let mut trace = ExecutionTrace::new();
        let mut current: NodeId = start.id().to_string();

        info!(%execution_id, nodes = graph.node_count(), cap, "workflow started");

        let failure = loop {
            if trace.len() >= cap {
                break Some(GraphExecutionError::IterationCap {
                    cap,
                    node_id: current.clone(),
                });
            }
            let Some(node) = graph.node(&current) else {
                break Some(GraphExecutionError::UnknownNode(current.clone()));
            };

            match self.step(execution_id, graph, node, &mut context, &mut trace).await {
                Ok(Some(next)) => current = next,
                Ok(None) => break None,
                Err(e) => break Some(e),
            }
        };

        let status = if failure.is_none() {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        if let Some(e) = &failure {
            error!(%execution_id, node_id = %e.node_id(), error = %e, "workflow failed");
        } else {
            info!(%execution_id, nodes_executed = trace.len(), "workflow completed");
        }

        let result = RunResult {
            execution_id,
            status,
            final_context: context.into_current(),
            nodes_executed: trace.len(),
            execution_trace: trace,
            error: failure.as_ref().map(|e| e.to_string()),
            failed_at_node: failure.as_ref().map(|e| e.node_id().to_string()),
        };

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record_run(&result.summary(started_at)) {
                warn!(%execution_id, error = %e, "failed to record run summary");
            }
        }
        Ok(result)
    }

    /// Execute one node. Returns the next node id, or `None` when the run
    /// is complete.
    async fn step(
        &self,
        execution_id: Uuid,
        graph: &WorkflowGraph,
        node: &Node,
        context: &mut ExecutionContext,
        trace: &mut ExecutionTrace,
    ) -> Result<Option<NodeId>, GraphExecutionError> {
        let mut pending = PendingEntry::begin(node, context.snapshot());
        info!(node_id = %node.id(), node_type = %node.node_type(), "executing node");

        let update = match node.kind() {
            NodeKind::Start | NodeKind::End => ContextMap::new(),
            NodeKind::Action(task) | NodeKind::Decision(task) => {
                let Some(executor) = self.executors.get(task.executor()) else {
                    let err = GraphExecutionError::NoExecutor {
                        node_id: node.id().to_string(),
                        kind: task.executor(),
                    };
                    return Err(self.fail(execution_id, pending, context, trace, err));
                };
                let timeout = Duration::from_secs(task.timeout_secs());
                match executor.execute(task.payload(), context.view(), timeout).await {
                    Ok(output) => {
                        pending.set_metadata(output.metadata.to_map());
                        output.updates
                    }
                    Err(source) => {
                        let err = GraphExecutionError::NodeExecution {
                            node_id: node.id().to_string(),
                            source,
                        };
                        return Err(self.fail(execution_id, pending, context, trace, err));
                    }
                }
            }
        };

        let decision = if node.node_type() == NodeType::Decision {
            match read_decision(node, &update) {
                Ok(decision) => {
                    pending.set_decision(decision.clone());
                    Some(decision)
                }
                Err(err) => return Err(self.fail(execution_id, pending, context, trace, err)),
            }
        } else {
            None
        };

        let next = match resolve_next(graph, node, decision.as_deref()) {
            Ok(next) => next,
            Err(err) => return Err(self.fail(execution_id, pending, context, trace, err)),
        };

        context.merge(update);
        if let Some(decision) = &decision {
            context.set(BRANCH_DECISION_KEY, decision);
            if let Some(next) = &next {
                pending.set_path_taken(next.clone());
            }
        }

        let entry = pending.succeed(context.snapshot());
        debug!(
            node_id = %entry.node_id,
            execution_time = entry.execution_time,
            next = next.as_deref().unwrap_or("done"),
            "node complete"
        );
        self.append(execution_id, trace, entry);
        Ok(next)
    }

    /// Finalize a failed entry; the context is left as it was.
    fn fail(
        &self,
        execution_id: Uuid,
        pending: PendingEntry,
        context: &ExecutionContext,
        trace: &mut ExecutionTrace,
        err: GraphExecutionError,
    ) -> GraphExecutionError {
        error!(node_id = %pending.node_id(), error = %err, "node failed");
        let entry = pending.fail(context.snapshot(), err.to_string());
        self.append(execution_id, trace, entry);
        err
    }

    fn append(&self, execution_id: Uuid, trace: &mut ExecutionTrace, entry: TraceEntry) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record_entry(execution_id, &entry) {
                warn!(%execution_id, node_id = %entry.node_id, error = %e, "failed to record trace entry");
            }
        }
        trace.push(entry);
    }
}

/// The normalized `"true"` / `"false"` a decision node wrote.
fn read_decision(node: &Node, update: &ContextMap) -> Result<String, GraphExecutionError> {
    let raw = update
        .get(BRANCH_DECISION_KEY)
        .ok_or_else(|| GraphExecutionError::MissingDecision {
            node_id: node.id().to_string(),
        })?;
    match normalize_decision(raw) {
        Some(decision) if decision == "true" || decision == "false" => Ok(decision),
        _ => Err(GraphExecutionError::InvalidDecision {
            node_id: node.id().to_string(),
            value: raw.to_string(),
        }),
    }
}

fn resolve_next(
    graph: &WorkflowGraph,
    node: &Node,
    decision: Option<&str>,
) -> Result<Option<NodeId>, GraphExecutionError> {
    if node.node_type() == NodeType::End {
        return Ok(None);
    }
    let outgoing = graph.outgoing(node.id());
    match (outgoing.as_slice(), decision) {
        ([], _) => Ok(None),
        ([only], Some(_)) if only.condition.is_none() => Ok(Some(only.to.clone())),
        (edges, Some(decision)) => edges
            .iter()
            .find(|e| e.matches(decision))
            .map(|e| Some(e.to.clone()))
            .ok_or_else(|| GraphExecutionError::UnmatchedDecision {
                node_id: node.id().to_string(),
                decision: decision.to_string(),
            }),
        ([only], None) => Ok(Some(only.to.clone())),
        (edges, None) => Err(GraphExecutionError::AmbiguousEdges {
            node_id: node.id().to_string(),
            count: edges.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nf_cache::{EvictionPolicy, MemoryCodeCache};
    use nf_core::graph::ExecutorKind;
    use nf_core::trace::{RunSummary, TraceStatus};
    use nf_executor::{
        CachedGenerationExecutor, CircuitBreaker, CircuitBreakerConfig, CodeGenerator,
        DirectSandboxExecutor, ExecutionOutput, Executor, ExecutorError, GeneratedCode,
        GenerationRequest, SandboxClient, SandboxResponse,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Understands the handful of payloads the tests use.
    #[derive(Default)]
    struct ScriptExecutor {
        calls: AtomicUsize,
    }

    impl ScriptExecutor {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for ScriptExecutor {
        async fn execute(
            &self,
            payload: &str,
            context: &ContextMap,
            _timeout: Duration,
        ) -> Result<ExecutionOutput, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let updates = match payload {
                "x = 1" => json!({"x": 1}),
                "pass" => json!({}),
                "route = 'high'" => json!({"route": "high"}),
                "route = 'low'" => json!({"route": "low"}),
                "branch_decision = amount > 1000" => {
                    let amount = context.get("amount").and_then(Value::as_i64).unwrap_or(0);
                    json!({"branch_decision": amount > 1000})
                }
                "branch_decision = 'True '" => json!({"branch_decision": "True "}),
                "branch_decision = 'maybe'" => json!({"branch_decision": "maybe"}),
                "raise ValueError('bad')" => {
                    return Err(ExecutorError::CodeExecutionError("ValueError: bad".into()))
                }
                other => panic!("unexpected payload {other}"),
            };
            Ok(ExecutionOutput {
                updates: updates.as_object().cloned().unwrap(),
                ..Default::default()
            })
        }
    }

    fn engine(exec: Arc<ScriptExecutor>) -> GraphEngine {
        GraphEngine::new(ExecutorRegistry::new().with(ExecutorKind::Direct, exec))
    }

    fn ctx(v: Value) -> ContextMap {
        v.as_object().cloned().unwrap()
    }

    const LINEAR: &str = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "set_x", "type": "action", "code": "x = 1"},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"from": "start", "to": "set_x"},
            {"from": "set_x", "to": "end"}
        ]
    }"#;

    fn branching(decision_code: &str) -> String {
        json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "check", "type": "decision", "code": decision_code},
                {"id": "high", "type": "action", "code": "route = 'high'"},
                {"id": "low", "type": "action", "code": "route = 'low'"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "check"},
                {"from": "check", "to": "high", "condition": "true"},
                {"from": "check", "to": "low", "condition": "false"},
                {"from": "high", "to": "end"},
                {"from": "low", "to": "end"}
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn linear_workflow_merges_context() {
        let exec = Arc::new(ScriptExecutor::default());
        let result = engine(exec.clone())
            .run_definition(LINEAR, ContextMap::new())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(Value::Object(result.final_context), json!({"x": 1}));
        assert_eq!(result.nodes_executed, 3);
        assert_eq!(result.execution_trace.path(), vec!["start", "set_x", "end"]);
        // Start and End never reach an executor.
        assert_eq!(exec.calls(), 1);

        let entries = result.execution_trace.entries();
        assert!(entries[1].input_context_snapshot.is_empty());
        assert_eq!(entries[1].output_context_snapshot["x"], json!(1));
    }

    #[tokio::test]
    async fn decision_routes_on_amount() {
        let exec = Arc::new(ScriptExecutor::default());
        let engine = engine(exec);
        let def = branching("branch_decision = amount > 1000");

        let high = engine.run_definition(&def, ctx(json!({"amount": 1500}))).await.unwrap();
        assert!(high.is_success());
        assert_eq!(high.final_context["route"], json!("high"));
        assert_eq!(high.final_context[BRANCH_DECISION_KEY], json!("true"));
        let check = &high.execution_trace.entries()[1];
        assert_eq!(check.decision_result.as_deref(), Some("true"));
        assert_eq!(check.path_taken.as_deref(), Some("high"));

        let low = engine.run_definition(&def, ctx(json!({"amount": 279}))).await.unwrap();
        assert_eq!(low.final_context["route"], json!("low"));
        assert_eq!(low.final_context[BRANCH_DECISION_KEY], json!("false"));
        assert_eq!(low.execution_trace.path(), vec!["start", "check", "low", "end"]);
    }

    #[tokio::test]
    async fn decision_strings_are_normalized() {
        let exec = Arc::new(ScriptExecutor::default());
        let result = engine(exec)
            .run_definition(&branching("branch_decision = 'True '"), ContextMap::new())
            .await
            .unwrap();
        assert_eq!(result.final_context["route"], json!("high"));
    }

    #[tokio::test]
    async fn missing_decision_fails_run() {
        let exec = Arc::new(ScriptExecutor::default());
        let result = engine(exec)
            .run_definition(&branching("pass"), ctx(json!({"amount": 5})))
            .await
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(result.failed_at_node.as_deref(), Some("check"));
        assert!(result.error.as_deref().unwrap().contains("branch_decision"));
        let last = result.execution_trace.last().unwrap();
        assert_eq!(last.status, TraceStatus::Failed);
        assert_eq!(result.nodes_executed, 2);
        assert_eq!(Value::Object(result.final_context), json!({"amount": 5}));
    }

    #[tokio::test]
    async fn invalid_decision_value_fails_run() {
        let exec = Arc::new(ScriptExecutor::default());
        let result = engine(exec)
            .run_definition(&branching("branch_decision = 'maybe'"), ContextMap::new())
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failed_at_node.as_deref(), Some("check"));
        // The failed node's update is not merged.
        assert!(!result.final_context.contains_key(BRANCH_DECISION_KEY));
    }

    #[tokio::test]
    async fn unmatched_decision_fails_run() {
        let def = json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "check", "type": "decision", "code": "branch_decision = amount > 1000"},
                {"id": "high", "type": "action", "code": "route = 'high'"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "check"},
                {"from": "check", "to": "high", "condition": "true"},
                {"from": "high", "to": "end"}
            ]
        })
        .to_string();
        let exec = Arc::new(ScriptExecutor::default());
        let result = engine(exec).run_definition(&def, ctx(json!({"amount": 1}))).await.unwrap();
        assert!(!result.is_success());
        assert!(result.error.as_deref().unwrap().contains("\"false\""));
    }

    #[tokio::test]
    async fn single_unconditioned_decision_edge_is_followed() {
        let def = json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "check", "type": "decision", "code": "branch_decision = amount > 1000"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "check"},
                {"from": "check", "to": "end"}
            ]
        })
        .to_string();
        let exec = Arc::new(ScriptExecutor::default());
        let result = engine(exec).run_definition(&def, ctx(json!({"amount": 1}))).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.execution_trace.entries()[1].path_taken.as_deref(), Some("end"));
    }

    #[tokio::test]
    async fn forced_cycle_hits_iteration_cap() {
        let def = json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "spin", "type": "action", "code": "pass"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "spin"},
                {"from": "spin", "to": "spin"}
            ]
        })
        .to_string();
        let exec = Arc::new(ScriptExecutor::default());
        let result = engine(exec.clone()).run_definition(&def, ContextMap::new()).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.execution_trace.len(), 6);
        assert_eq!(result.nodes_executed, 6);
        assert_eq!(exec.calls(), 5);
        assert!(result.error.as_deref().unwrap().contains("iteration cap of 6"));
        assert_eq!(result.failed_at_node.as_deref(), Some("spin"));
    }

    #[tokio::test]
    async fn invalid_graph_runs_nothing() {
        let def = r#"{
            "nodes": [{"id": "a", "type": "action", "code": "x = 1"}],
            "edges": [{"from": "a", "to": "ghost"}]
        }"#;
        let exec = Arc::new(ScriptExecutor::default());
        let err = engine(exec.clone()).run_definition(def, ContextMap::new()).await.unwrap_err();
        assert_eq!(err.violations.len(), 3);
        assert_eq!(exec.calls(), 0);
    }

    #[tokio::test]
    async fn failed_node_stops_run_with_partial_trace() {
        let def = json!({
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "set_x", "type": "action", "code": "x = 1"},
                {"id": "boom", "type": "action", "code": "raise ValueError('bad')"},
                {"id": "end", "type": "end"}
            ],
            "edges": [
                {"from": "start", "to": "set_x"},
                {"from": "set_x", "to": "boom"},
                {"from": "boom", "to": "end"}
            ]
        })
        .to_string();
        let exec = Arc::new(ScriptExecutor::default());
        let result = engine(exec).run_definition(&def, ContextMap::new()).await.unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.failed_at_node.as_deref(), Some("boom"));
        assert_eq!(result.execution_trace.path(), vec!["start", "set_x", "boom"]);
        assert_eq!(Value::Object(result.final_context), json!({"x": 1}));
        let failed = result.execution_trace.last().unwrap();
        assert!(failed.error_message.as_deref().unwrap().contains("ValueError"));
    }

    #[tokio::test]
    async fn missing_executor_fails_node() {
        let def = r#"{
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "gen", "type": "action", "prompt": "Compute x"},
                {"id": "end", "type": "end"}
            ],
            "edges": [{"from": "start", "to": "gen"}, {"from": "gen", "to": "end"}]
        }"#;
        let exec = Arc::new(ScriptExecutor::default());
        let result = engine(exec).run_definition(def, ContextMap::new()).await.unwrap();
        assert_eq!(result.failed_at_node.as_deref(), Some("gen"));
        assert!(result.error.as_deref().unwrap().contains("cached"));
    }

    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<(Uuid, String)>>,
        runs: Mutex<Vec<RunSummary>>,
        broken: bool,
    }

    impl TraceSink for RecordingSink {
        fn record_entry(&self, execution_id: Uuid, entry: &TraceEntry) -> anyhow::Result<()> {
            if self.broken {
                anyhow::bail!("disk full");
            }
            self.entries.lock().unwrap().push((execution_id, entry.node_id.clone()));
            Ok(())
        }

        fn record_run(&self, summary: &RunSummary) -> anyhow::Result<()> {
            if self.broken {
                anyhow::bail!("disk full");
            }
            self.runs.lock().unwrap().push(summary.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn sink_receives_entries_and_summary() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(Arc::new(ScriptExecutor::default())).with_trace_sink(sink.clone());
        let result = engine.run_definition(LINEAR, ContextMap::new()).await.unwrap();

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|(id, _)| *id == result.execution_id));
        let runs = sink.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].nodes_executed, 3);
    }

    #[tokio::test]
    async fn broken_sink_never_fails_run() {
        let sink = Arc::new(RecordingSink {
            broken: true,
            ..Default::default()
        });
        let engine = engine(Arc::new(ScriptExecutor::default())).with_trace_sink(sink);
        let result = engine.run_definition(LINEAR, ContextMap::new()).await.unwrap();
        assert!(result.is_success());
    }

    // -- end-to-end with the real cached and direct executors --

    struct CountingSandbox {
        calls: AtomicUsize,
        refuse: bool,
    }

    #[async_trait]
    impl SandboxClient for CountingSandbox {
        async fn run(
            &self,
            _code: &str,
            _context: &ContextMap,
            _timeout: Duration,
        ) -> Result<SandboxResponse, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(ExecutorError::ConnectionError("connection refused".into()));
            }
            Ok(SandboxResponse {
                updated_fields: ctx(json!({"total": 42})),
                ..Default::default()
            })
        }
    }

    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CodeGenerator for CountingGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedCode, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GeneratedCode {
                code: "total = sum(context['items'])".into(),
                model_id: "test-model".into(),
                usage: Default::default(),
            })
        }
    }

    const GENERATED: &str = r#"{
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "sum", "type": "action", "prompt": "Sum the items"},
            {"id": "end", "type": "end"}
        ],
        "edges": [{"from": "start", "to": "sum"}, {"from": "sum", "to": "end"}]
    }"#;

    #[tokio::test]
    async fn identical_rerun_makes_no_generation_calls() {
        let sandbox = Arc::new(CountingSandbox {
            calls: AtomicUsize::new(0),
            refuse: false,
        });
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
        });
        let breaker = Arc::new(CircuitBreaker::new("sandbox", CircuitBreakerConfig::default()));
        let direct: Arc<dyn Executor> = Arc::new(DirectSandboxExecutor::new(sandbox.clone(), breaker));
        let cached = Arc::new(CachedGenerationExecutor::new(
            Arc::new(MemoryCodeCache::new(EvictionPolicy::default())),
            generator.clone(),
            direct.clone(),
        ));
        let engine = GraphEngine::new(
            ExecutorRegistry::new()
                .with(ExecutorKind::Direct, direct)
                .with(ExecutorKind::Cached, cached),
        );

        let input = ctx(json!({"items": [1, 2, 39]}));
        let first = engine.run_definition(GENERATED, input.clone()).await.unwrap();
        assert!(first.is_success());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        let second = engine.run_definition(GENERATED, input).await.unwrap();
        assert!(second.is_success());
        assert_eq!(second.final_context["total"], json!(42));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.execution_trace.entries()[1].metadata["cache_hit"], json!(true));
    }

    #[tokio::test]
    async fn open_breaker_fails_runs_fast() {
        let sandbox = Arc::new(CountingSandbox {
            calls: AtomicUsize::new(0),
            refuse: true,
        });
        let breaker = Arc::new(CircuitBreaker::new("sandbox", CircuitBreakerConfig::default()));
        let engine = GraphEngine::new(ExecutorRegistry::new().with(
            ExecutorKind::Direct,
            Arc::new(DirectSandboxExecutor::new(sandbox.clone(), breaker.clone())),
        ));

        for _ in 0..5 {
            let result = engine.run_definition(LINEAR, ContextMap::new()).await.unwrap();
            assert!(result.error.as_deref().unwrap().contains("connection refused"));
        }
        let sixth = engine.run_definition(LINEAR, ContextMap::new()).await.unwrap();
        assert!(sixth.error.as_deref().unwrap().contains("circuit breaker"));
        assert_eq!(sandbox.calls.load(Ordering::SeqCst), 5);
    }
}

//! Tests for DAG execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use vigil_core::{
    AlertEvent, ConnectionTarget, Connections, EventPipeline, InputVariable, ManualClock,
    NodeConnections, ProcessorConfig, WorkflowNode,
};

use super::{Engine, CYCLE_MESSAGE};
use crate::context::{TriggerContext, TriggerMode, WorkflowContext};
use crate::error::{PipelineError, Result};
use crate::processor::{
    BranchOutput, BranchProcessor, NodeProcessor, Processed, Processor, ProcessorRegistry,
};
use crate::recorder::{MemoryExecutionStore, Recorder};
use crate::result::{ExecutionStatus, NodeStatus};

// -- test processors -----------------------------------------------------

/// Tags the event with `seen_<key>=1`.
struct Mark {
    key: String,
}

#[async_trait]
impl Processor for Mark {
    async fn process(&self, mut ctx: WorkflowContext) -> Result<Processed> {
        if let Some(e) = ctx.event.as_mut() {
            e.set_tag(format!("seen_{}", self.key), "1");
        }
        Ok(Processed::next(ctx))
    }
}

/// Follows the configured output, or every output when unset.
struct Pick {
    branch: Option<usize>,
    terminate: bool,
}

#[async_trait]
impl BranchProcessor for Pick {
    async fn process_with_branch(&self, ctx: WorkflowContext) -> Result<BranchOutput> {
        Ok(BranchOutput {
            ctx: Some(ctx),
            message: String::new(),
            branch_index: self.branch,
            terminate: self.terminate,
        })
    }
}

/// Fails until it has been called `fail_times` times.
struct Flaky {
    calls: Arc<AtomicUsize>,
    fail_times: usize,
}

#[async_trait]
impl Processor for Flaky {
    async fn process(&self, ctx: WorkflowContext) -> Result<Processed> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_times {
            return Err(PipelineError::Processor(format!("attempt {n} failed")));
        }
        Ok(Processed::next(ctx))
    }
}

/// Opens a stream with one chunk.
struct Stream;

#[async_trait]
impl Processor for Stream {
    async fn process(&self, mut ctx: WorkflowContext) -> Result<Processed> {
        let (tx, rx) = mpsc::channel(4);
        tx.send("hello".to_string())
            .await
            .map_err(|e| PipelineError::Processor(e.to_string()))?;
        ctx.stream = true;
        ctx.stream_chan = Some(Arc::new(Mutex::new(rx)));
        Ok(Processed::next(ctx))
    }
}

/// Branch node that opens a stream and picks output 0.
struct StreamBranch;

#[async_trait]
impl BranchProcessor for StreamBranch {
    async fn process_with_branch(&self, mut ctx: WorkflowContext) -> Result<BranchOutput> {
        let (tx, rx) = mpsc::channel(4);
        tx.send("from branch".to_string())
            .await
            .map_err(|e| PipelineError::Processor(e.to_string()))?;
        ctx.stream = true;
        ctx.stream_chan = Some(Arc::new(Mutex::new(rx)));
        Ok(BranchOutput {
            ctx: Some(ctx),
            message: String::new(),
            branch_index: Some(0),
            terminate: false,
        })
    }
}

fn registry(calls: Arc<AtomicUsize>) -> ProcessorRegistry {
    let mut reg = ProcessorRegistry::with_builtins();
    reg.register("mark", |cfg| {
        let key = cfg["key"].as_str().unwrap_or("x").to_string();
        Ok(NodeProcessor::Normal(Arc::new(Mark { key })))
    });
    reg.register("pick", |cfg| {
        Ok(NodeProcessor::Branch(Arc::new(Pick {
            branch: cfg["branch"].as_u64().map(|b| b as usize),
            terminate: cfg["terminate"].as_bool().unwrap_or(false),
        })))
    });
    reg.register("flaky", move |cfg| {
        Ok(NodeProcessor::Normal(Arc::new(Flaky {
            calls: calls.clone(),
            fail_times: cfg["fail_times"].as_u64().unwrap_or(u64::MAX) as usize,
        })))
    });
    reg.register("stream", |_| Ok(NodeProcessor::Normal(Arc::new(Stream))));
    reg.register("stream_branch", |_| Ok(NodeProcessor::Branch(Arc::new(StreamBranch))));
    reg
}

fn engine() -> Engine {
    Engine::new(registry(Arc::new(AtomicUsize::new(0))))
}

// -- pipeline builders ---------------------------------------------------

fn node(id: &str, kind: &str, config: Value) -> WorkflowNode {
    WorkflowNode {
        id: id.into(),
        name: id.into(),
        node_type: kind.into(),
        config,
        disabled: false,
        continue_on_fail: false,
        retry_on_fail: false,
        max_retries: 1,
        retry_interval: 1,
    }
}

fn mark(id: &str) -> WorkflowNode {
    node(id, "mark", json!({"key": id}))
}

/// `(from, output, to)` triples.
fn edges(list: &[(&str, usize, &str)]) -> Connections {
    let mut conns: Connections = HashMap::new();
    for &(from, output, to) in list {
        let entry = conns.entry(from.to_string()).or_insert_with(NodeConnections::default);
        while entry.main.len() <= output {
            entry.main.push(Vec::new());
        }
        entry.main[output].push(ConnectionTarget {
            node: to.into(),
            conn_type: "main".into(),
            index: 0,
        });
    }
    conns
}

fn pipeline(nodes: Vec<WorkflowNode>, connections: Connections) -> EventPipeline {
    EventPipeline {
        id: 9,
        name: "triage".into(),
        nodes,
        connections,
        ..Default::default()
    }
}

fn event() -> AlertEvent {
    let mut e = AlertEvent { id: 42, hash: "h".into(), ..Default::default() };
    e.set_tag("env", "prod");
    e
}

// -- ordering ------------------------------------------------------------

#[tokio::test]
async fn empty_pipeline_succeeds() {
    let (out, result) = engine()
        .execute(&pipeline(vec![], HashMap::new()), event(), &TriggerContext::default())
        .await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(result.node_results.is_empty());
    assert_eq!(out, Some(event()));
}

#[tokio::test]
async fn linear_chain_threads_context() {
    let p = pipeline(
        vec![mark("a"), mark("b"), mark("c")],
        edges(&[("a", 0, "b"), ("b", 0, "c")]),
    );
    let (out, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.executed(), vec!["a", "b", "c"]);
    let tags = out.unwrap().tags_map;
    assert!(["seen_a", "seen_b", "seen_c"].iter().all(|k| tags.contains_key(*k)));
}

#[tokio::test]
async fn independent_branches_run_in_authored_order() {
    let p = pipeline(
        vec![mark("root"), mark("left"), mark("right"), mark("solo")],
        edges(&[("root", 0, "left"), ("root", 0, "right")]),
    );
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;
    assert_eq!(result.executed(), vec!["root", "solo", "left", "right"]);
}

#[tokio::test]
async fn chosen_branch_skips_other_path() {
    let p = pipeline(
        vec![node("a", "pick", json!({"branch": 1})), mark("b"), mark("c"), mark("d")],
        edges(&[("a", 0, "b"), ("a", 1, "c"), ("b", 0, "d"), ("c", 0, "d")]),
    );
    let (out, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.executed(), vec!["a", "c", "d"]);
    assert_eq!(result.node("a").unwrap().branch_index, Some(1));
    let tags = out.unwrap().tags_map;
    assert!(!tags.contains_key("seen_b"));
    assert!(tags.contains_key("seen_d"));
}

#[tokio::test]
async fn skipped_path_does_not_run_its_descendants() {
    let p = pipeline(
        vec![node("a", "pick", json!({"branch": 0})), mark("b"), mark("c"), mark("e")],
        edges(&[("a", 0, "b"), ("a", 1, "c"), ("c", 0, "e")]),
    );
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;
    assert_eq!(result.executed(), vec!["a", "b"]);
}

#[tokio::test]
async fn unset_branch_follows_every_output() {
    let p = pipeline(
        vec![node("a", "pick", json!({})), mark("b"), mark("c"), mark("d")],
        edges(&[("a", 0, "b"), ("a", 1, "c"), ("b", 0, "d"), ("c", 0, "d")]),
    );
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;
    assert_eq!(result.executed(), vec!["a", "b", "c", "d"]);
    assert_eq!(result.node("a").unwrap().branch_index, None);
}

#[tokio::test]
async fn plain_node_follows_first_output_only() {
    let p = pipeline(
        vec![mark("a"), mark("b"), mark("c")],
        edges(&[("a", 0, "b"), ("a", 1, "c")]),
    );
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;
    assert_eq!(result.executed(), vec!["a", "b"]);
}

#[tokio::test]
async fn switch_routes_on_tags() {
    let switch = node(
        "route",
        "switch",
        json!({"cases": [
            {"name": "dev", "label_filters": [{"key": "env", "func": "==", "value": "dev"}]},
            {"name": "prod", "label_filters": [{"key": "env", "func": "==", "value": "prod"}]}
        ]}),
    );
    let p = pipeline(
        vec![switch, mark("dev"), mark("prod"), mark("other")],
        edges(&[("route", 0, "dev"), ("route", 1, "prod"), ("route", 2, "other")]),
    );
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;
    assert_eq!(result.executed(), vec!["route", "prod"]);
}

// -- cycles --------------------------------------------------------------

#[tokio::test]
async fn cycle_fails_before_running_anything() {
    let p = pipeline(vec![mark("x"), mark("y")], edges(&[("x", 0, "y"), ("y", 0, "x")]));
    let (out, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.message, CYCLE_MESSAGE);
    assert!(result.node_results.is_empty());
    assert_eq!(out, Some(event()));
}

#[tokio::test]
async fn cycle_behind_a_root_is_detected() {
    let p = pipeline(
        vec![mark("r"), mark("x"), mark("y")],
        edges(&[("r", 0, "x"), ("x", 0, "y"), ("y", 0, "x")]),
    );
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;
    assert_eq!(result.message, CYCLE_MESSAGE);
    assert!(result.node_results.is_empty());
}

// -- streaming -----------------------------------------------------------

#[tokio::test]
async fn streaming_node_ends_execution() {
    let p = pipeline(
        vec![mark("a"), node("b", "stream", Value::Null), mark("c")],
        edges(&[("a", 0, "b"), ("b", 0, "c")]),
    );
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.status, ExecutionStatus::Streaming);
    assert_eq!(result.executed(), vec!["a", "b"]);
    assert_eq!(result.node("b").unwrap().status, NodeStatus::Streaming);

    let chan = result.stream_chan.expect("stream channel");
    let mut rx = chan.lock().await;
    assert_eq!(rx.recv().await.as_deref(), Some("hello"));
}

#[tokio::test]
async fn streaming_branch_node_ends_execution() {
    let p = pipeline(
        vec![mark("a"), node("b", "stream_branch", Value::Null), mark("c")],
        edges(&[("a", 0, "b"), ("b", 0, "c")]),
    );
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.status, ExecutionStatus::Streaming);
    assert_eq!(result.executed(), vec!["a", "b"]);
    assert_eq!(result.node("b").unwrap().status, NodeStatus::Streaming);

    let chan = result.stream_chan.expect("stream channel");
    let mut rx = chan.lock().await;
    assert_eq!(rx.recv().await.as_deref(), Some("from branch"));
}

// -- node status ---------------------------------------------------------

#[tokio::test]
async fn disabled_node_is_skipped_and_edges_still_flow() {
    let mut a = mark("a");
    a.disabled = true;
    let p = pipeline(vec![a, mark("b")], edges(&[("a", 0, "b")]));
    let (out, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.node("a").unwrap().status, NodeStatus::Skipped);
    assert_eq!(result.node("b").unwrap().status, NodeStatus::Success);
    assert!(!out.unwrap().tags_map.contains_key("seen_a"));
}

#[tokio::test]
async fn failure_stops_execution() {
    let p = pipeline(
        vec![node("a", "flaky", json!({})), mark("b")],
        edges(&[("a", 0, "b")]),
    );
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error_node.as_deref(), Some("a"));
    assert_eq!(result.executed(), vec!["a"]);
    assert!(result.message.contains("attempt 0 failed"));
}

#[tokio::test]
async fn continue_on_fail_keeps_parallel_branches() {
    let mut bad = node("bad", "flaky", json!({}));
    bad.continue_on_fail = true;
    let p = pipeline(
        vec![mark("root"), bad, mark("good"), mark("join")],
        edges(&[
            ("root", 0, "bad"),
            ("root", 0, "good"),
            ("bad", 0, "join"),
            ("good", 0, "join"),
        ]),
    );
    let (out, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.executed(), vec!["root", "bad", "good", "join"]);
    assert_eq!(result.node("bad").unwrap().status, NodeStatus::Failed);
    assert!(out.unwrap().tags_map.contains_key("seen_join"));
}

#[tokio::test]
async fn unknown_processor_fails_node() {
    let p = pipeline(vec![node("a", "ai_summary", Value::Null)], HashMap::new());
    let (_, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    let a = result.node("a").unwrap();
    assert_eq!(a.status, NodeStatus::Failed);
    assert!(a.error.as_deref().unwrap().contains("unknown processor type"));
}

#[tokio::test]
async fn dropped_event_terminates() {
    let drop = node(
        "drop",
        "event_drop",
        json!({"label_filters": [{"key": "env", "func": "==", "value": "prod"}]}),
    );
    let p = pipeline(
        vec![mark("a"), drop, mark("c")],
        edges(&[("a", 0, "drop"), ("drop", 0, "c")]),
    );
    let (out, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert!(out.is_none());
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.executed(), vec!["a", "drop"]);
    assert_eq!(result.node("drop").unwrap().status, NodeStatus::Terminated);
    assert_eq!(result.message, "event h dropped");
}

#[tokio::test]
async fn branch_can_terminate_keeping_event() {
    let p = pipeline(
        vec![node("a", "pick", json!({"branch": 0, "terminate": true})), mark("b")],
        edges(&[("a", 0, "b")]),
    );
    let (out, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert!(out.is_some());
    assert_eq!(result.executed(), vec!["a"]);
    assert_eq!(result.node("a").unwrap().status, NodeStatus::Terminated);
    assert_eq!(result.message, "terminated by node a");
}

// -- retries -------------------------------------------------------------

fn flaky_pipeline(fail_times: u64, retry_on_fail: bool, max_retries: u32) -> EventPipeline {
    let mut n = node("f", "flaky", json!({"fail_times": fail_times}));
    n.retry_on_fail = retry_on_fail;
    n.max_retries = max_retries;
    n.retry_interval = 2;
    pipeline(vec![n], HashMap::new())
}

#[tokio::test(start_paused = true)]
async fn retries_until_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(registry(calls.clone()));
    let started = tokio::time::Instant::now();

    let (_, result) = engine
        .execute(&flaky_pipeline(2, true, 2), event(), &TriggerContext::default())
        .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(registry(calls.clone()));

    let (_, result) = engine
        .execute(&flaky_pipeline(5, true, 1), event(), &TriggerContext::default())
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn no_retry_without_retry_on_fail() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(registry(calls.clone()));

    let (_, result) = engine
        .execute(&flaky_pipeline(1, false, 3), event(), &TriggerContext::default())
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// -- inputs and recording ------------------------------------------------

fn with_inputs(mut p: EventPipeline) -> EventPipeline {
    p.inputs = vec![
        InputVariable { key: "team".into(), value: "sre".into(), ..Default::default() },
        InputVariable { key: "token".into(), required: true, secret: true, ..Default::default() },
    ];
    p
}

#[tokio::test]
async fn missing_required_input_fails() {
    let p = with_inputs(pipeline(vec![mark("a")], HashMap::new()));
    let (out, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.message, "required input token is missing");
    assert!(result.node_results.is_empty());
    assert_eq!(out, Some(event()));
}

#[tokio::test]
async fn overrides_feed_templates() {
    let annotate = node(
        "note",
        "annotate",
        json!({"annotations": {"owner": "{{ inputs.team }}"}}),
    );
    let p = with_inputs(pipeline(vec![annotate], HashMap::new()));
    let trigger = TriggerContext {
        inputs_overrides: [("token".to_string(), "s3cret".to_string()), ("team".into(), "dba".into())]
            .into_iter()
            .collect(),
        ..Default::default()
    };
    let (out, result) = engine().execute(&p, event(), &trigger).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(out.unwrap().annotations["owner"], "dba");
}

#[tokio::test]
async fn recorded_execution_redacts_secrets() {
    let store = Arc::new(MemoryExecutionStore::new());
    let recorder = Recorder::new(store.clone(), Arc::new(ManualClock::new(0)));
    let engine = Engine::new(registry(Arc::new(AtomicUsize::new(0)))).with_recorder(recorder);

    let p = with_inputs(pipeline(vec![mark("a"), mark("b")], edges(&[("a", 0, "b")])));
    let trigger = TriggerContext {
        mode: Some(TriggerMode::Api),
        request_id: Some("req-1".into()),
        trigger_by: "alice".into(),
        inputs_overrides: [("token".to_string(), "s3cret".to_string())].into_iter().collect(),
        stream: false,
    };
    engine.execute(&p, event(), &trigger).await;

    let rows = store.all();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.id, "req-1");
    assert_eq!(row.mode, "api");
    assert_eq!(row.event_id, 42);
    assert_eq!(row.status, ExecutionStatus::Success);
    assert_eq!(row.trigger_by, "alice");
    assert!(!row.inputs_snapshot_json.contains("s3cret"));

    let inputs: Value = serde_json::from_str(&row.inputs_snapshot_json).unwrap();
    assert_eq!(inputs["token"], "******");
    assert_eq!(inputs["team"], "sre");
    let nodes: Vec<Value> = serde_json::from_str(&row.node_results_json).unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[1]["status"], "success");
}

#[tokio::test]
async fn execution_without_mode_is_not_recorded() {
    let store = Arc::new(MemoryExecutionStore::new());
    let recorder = Recorder::new(store.clone(), Arc::new(ManualClock::new(0)));
    let engine = Engine::new(registry(Arc::new(AtomicUsize::new(0)))).with_recorder(recorder);

    let p = pipeline(vec![mark("a")], HashMap::new());
    engine.execute(&p, event(), &TriggerContext::default()).await;
    assert!(store.is_empty());

    engine.execute(&p, event(), &TriggerContext::event()).await;
    let rows = store.all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].mode, "event");
    assert!(uuid::Uuid::parse_str(&rows[0].id).is_ok());
}

#[tokio::test]
async fn legacy_processor_list_runs_linearly() {
    let p = EventPipeline {
        processors: vec![
            ProcessorConfig { typ: "relabel".into(), config: json!({"set": {"team": "sre"}}) },
            ProcessorConfig {
                typ: "annotate".into(),
                config: json!({"annotations": {"summary": "team {{ labels.team }}"}}),
            },
        ],
        ..Default::default()
    };
    let (out, result) = engine().execute(&p, event(), &TriggerContext::default()).await;

    assert_eq!(result.executed(), vec!["node_0", "node_1"]);
    assert_eq!(out.unwrap().annotations["summary"], "team sre");
}

//! DAG execution of event pipelines.
//!
//! Nodes run one at a time in Kahn order. Ready nodes are taken FIFO so
//! independent branches run in the order they were authored. An edge that a
//! branch node does not follow still counts as resolved for its target; a
//! target whose incoming edges all resolved without any being followed is
//! never run, and its own outgoing edges resolve the same way.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use vigil_core::{AlertEvent, EventPipeline, WorkflowNode};

use crate::context::{Metadata, TriggerContext, WorkflowContext};
use crate::error::Result;
use crate::processor::{NodeProcessor, ProcessorRegistry};
use crate::recorder::{PipelineExecution, Recorder};
use crate::result::{ExecutionStatus, NodeExecutionResult, NodeStatus, WorkflowResult};

pub const CYCLE_MESSAGE: &str = "workflow has circular dependency";
const REDACTED: &str = "******";

/// Which outputs of a finished node lead on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Follow {
    /// Output 0 only.
    Linear,
    Only(usize),
    All,
    Nothing,
}

impl Follow {
    fn takes(self, output: usize) -> bool {
        match self {
            Self::Linear => output == 0,
            Self::Only(k) => output == k,
            Self::All => true,
            Self::Nothing => false,
        }
    }
}

struct Graph {
    nodes: Vec<WorkflowNode>,
    /// `outputs[node][output]` lists target node positions.
    outputs: Vec<Vec<Vec<usize>>>,
    indegree: Vec<usize>,
}

impl Graph {
    fn build(pipeline: &EventPipeline) -> Self {
        let nodes: Vec<WorkflowNode> = pipeline
            .workflow_nodes()
            .into_iter()
            .map(|mut n| {
                if n.retry_interval == 0 {
                    n.retry_interval = 1;
                }
                if n.max_retries == 0 {
                    n.max_retries = 1;
                }
                n
            })
            .collect();
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let connections = pipeline.workflow_connections();
        let mut outputs = vec![Vec::new(); nodes.len()];
        let mut indegree = vec![0; nodes.len()];
        for (src, conns) in &connections {
            let Some(&from) = index.get(src.as_str()) else {
                continue;
            };
            outputs[from] = conns
                .main
                .iter()
                .map(|targets| {
                    targets
                        .iter()
                        .filter_map(|t| index.get(t.node.as_str()).copied())
                        .inspect(|&to| indegree[to] += 1)
                        .collect()
                })
                .collect();
        }
        Self { nodes, outputs, indegree }
    }

    fn is_acyclic(&self) -> bool {
        let mut indegree = self.indegree.clone();
        let mut ready: Vec<usize> = (0..self.nodes.len()).filter(|&i| indegree[i] == 0).collect();
        let mut seen = 0;
        while let Some(i) = ready.pop() {
            seen += 1;
            for &to in self.outputs[i].iter().flatten() {
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    ready.push(to);
                }
            }
        }
        seen == self.nodes.len()
    }
}

/// Mutable scheduling state of one execution.
struct Run {
    indegree: Vec<usize>,
    /// Reached by at least one followed edge (roots count).
    live: Vec<bool>,
    settled: Vec<bool>,
    queue: VecDeque<usize>,
}

impl Run {
    fn new(graph: &Graph) -> Self {
        let live: Vec<bool> = graph.indegree.iter().map(|&d| d == 0).collect();
        let queue = (0..graph.nodes.len()).filter(|&i| live[i]).collect();
        Self {
            indegree: graph.indegree.clone(),
            live,
            settled: vec![false; graph.nodes.len()],
            queue,
        }
    }

    /// Resolve the outgoing edges of `from`.
    fn release(&mut self, graph: &Graph, from: usize, follow: Follow) {
        let mut pending = vec![(from, follow)];
        while let Some((node, follow)) = pending.pop() {
            for (output, targets) in graph.outputs[node].iter().enumerate() {
                let taken = follow.takes(output);
                for &to in targets {
                    self.indegree[to] = self.indegree[to].saturating_sub(1);
                    self.live[to] |= taken;
                    if self.indegree[to] > 0 || self.settled[to] {
                        continue;
                    }
                    if self.live[to] {
                        self.queue.push_back(to);
                    } else {
                        self.settled[to] = true;
                        pending.push((to, Follow::Nothing));
                    }
                }
            }
        }
    }
}

struct NodeRun {
    result: NodeExecutionResult,
    ctx: WorkflowContext,
    follow: Follow,
}

/// Runs pipelines over events.
pub struct Engine {
    registry: Arc<ProcessorRegistry>,
    recorder: Option<Recorder>,
}

impl Engine {
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            recorder: None,
        }
    }

    /// Record executions whose trigger carries a mode.
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Run `pipeline` over `event`. Returns the event as the last node left
    /// it (`None` when a node dropped it) and the execution result.
    pub async fn execute(
        &self,
        pipeline: &EventPipeline,
        event: AlertEvent,
        trigger: &TriggerContext,
    ) -> (Option<AlertEvent>, WorkflowResult) {
        let started = Instant::now();
        let started_at = chrono::Utc::now().timestamp();
        let request_id = trigger
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let event_id = event.id;
        let mut result = WorkflowResult::new(pipeline.id, &pipeline.name, started_at);

        let mut ctx = WorkflowContext {
            event: Some(event),
            inputs: merged_inputs(pipeline, trigger),
            vars: serde_json::Map::new(),
            metadata: Metadata {
                start_time: started_at,
                pipeline_id: pipeline.id,
                request_id: request_id.clone(),
                trigger_mode: trigger.mode.map(|m| m.to_string()).unwrap_or_default(),
                trigger_by: trigger.trigger_by.clone(),
            },
            stream: trigger.stream,
            stream_chan: None,
        };

        if let Some(missing) = missing_input(pipeline, &ctx.inputs) {
            result.fail(format!("required input {missing} is missing"), None);
        } else {
            self.run_graph(pipeline, &mut ctx, &mut result).await;
        }

        result.finished_at = chrono::Utc::now().timestamp();
        result.duration_ms = started.elapsed().as_millis() as u64;
        if result.status == ExecutionStatus::Failed {
            warn!(
                pipeline_id = pipeline.id,
                error_node = result.error_node.as_deref().unwrap_or(""),
                message = %result.message,
                "pipeline execution failed"
            );
        }

        if let (Some(mode), Some(recorder)) = (trigger.mode, &self.recorder) {
            let exec = PipelineExecution {
                id: request_id,
                pipeline_id: pipeline.id,
                pipeline_name: pipeline.name.clone(),
                mode: mode.to_string(),
                status: result.status,
                error_message: if result.status == ExecutionStatus::Failed {
                    result.message.clone()
                } else {
                    String::new()
                },
                error_node: result.error_node.clone().unwrap_or_default(),
                event_id,
                created_at: result.started_at,
                finished_at: result.finished_at,
                duration_ms: result.duration_ms,
                trigger_by: trigger.trigger_by.clone(),
                node_results_json: serde_json::to_string(&result.node_results)
                    .unwrap_or_else(|_| "[]".into()),
                inputs_snapshot_json: inputs_snapshot(pipeline, &ctx.inputs),
            };
            recorder.record(exec).await;
        }

        (ctx.event, result)
    }

    async fn run_graph(
        &self,
        pipeline: &EventPipeline,
        ctx: &mut WorkflowContext,
        result: &mut WorkflowResult,
    ) {
        let graph = Graph::build(pipeline);
        if graph.nodes.is_empty() {
            return;
        }
        if !graph.is_acyclic() {
            result.fail(CYCLE_MESSAGE, None);
            return;
        }

        let mut run = Run::new(&graph);
        while let Some(i) = run.queue.pop_front() {
            if run.settled[i] {
                continue;
            }
            run.settled[i] = true;

            let node = &graph.nodes[i];
            let NodeRun { result: node_result, ctx: next, follow } =
                self.run_node(node, ctx.clone()).await;
            let status = node_result.status;
            let message = node_result.message.clone();
            let error = node_result.error.clone();
            debug!(
                pipeline_id = pipeline.id,
                node_id = %node.id,
                status = ?status,
                duration_ms = node_result.duration_ms,
                "pipeline node finished"
            );
            result.node_results.push(node_result);

            match status {
                NodeStatus::Streaming => {
                    result.status = ExecutionStatus::Streaming;
                    result.stream_chan = next.stream_chan.clone();
                    *ctx = next;
                    return;
                }
                NodeStatus::Failed if !node.continue_on_fail => {
                    let reason = error.unwrap_or(message);
                    result.fail(format!("node {} failed: {reason}", node.id), Some(node.id.as_str()));
                    return;
                }
                NodeStatus::Terminated => {
                    *ctx = next;
                    result.message = if message.is_empty() {
                        format!("terminated by node {}", node.id)
                    } else {
                        message
                    };
                    return;
                }
                _ => *ctx = next,
            }
            run.release(&graph, i, follow);
        }
    }

    async fn run_node(&self, node: &WorkflowNode, ctx: WorkflowContext) -> NodeRun {
        let started = Instant::now();
        let mut result = NodeExecutionResult {
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_type: node.node_type.clone(),
            status: NodeStatus::Success,
            message: String::new(),
            error: None,
            branch_index: None,
            started_at: chrono::Utc::now().timestamp(),
            finished_at: 0,
            duration_ms: 0,
        };
        let (ctx, follow) = self.invoke(node, ctx, &mut result).await;
        result.finished_at = chrono::Utc::now().timestamp();
        result.duration_ms = started.elapsed().as_millis() as u64;
        NodeRun { result, ctx, follow }
    }

    async fn invoke(
        &self,
        node: &WorkflowNode,
        ctx: WorkflowContext,
        result: &mut NodeExecutionResult,
    ) -> (WorkflowContext, Follow) {
        if node.disabled {
            result.status = NodeStatus::Skipped;
            result.message = "node disabled".into();
            return (ctx, Follow::Linear);
        }

        let processor = match self.registry.build(&node.node_type, &node.config) {
            Ok(p) => p,
            Err(e) => {
                result.status = NodeStatus::Failed;
                result.error = Some(e.to_string());
                return (ctx, Follow::Linear);
            }
        };
        let max_retries = if node.retry_on_fail { node.max_retries } else { 0 };

        match processor {
            NodeProcessor::Normal(p) => {
                match with_retries(node, max_retries, || p.process(ctx.clone())).await {
                    Ok(out) => {
                        result.message = out.message;
                        match out.ctx {
                            Some(next) if next.event.is_none() => {
                                result.status = NodeStatus::Terminated;
                                (next, Follow::Nothing)
                            }
                            Some(next) => {
                                if next.is_streaming() {
                                    result.status = NodeStatus::Streaming;
                                }
                                (next, Follow::Linear)
                            }
                            None => {
                                result.status = NodeStatus::Terminated;
                                let mut dropped = ctx;
                                dropped.event = None;
                                (dropped, Follow::Nothing)
                            }
                        }
                    }
                    Err(e) => {
                        result.status = NodeStatus::Failed;
                        result.error = Some(e.to_string());
                        (ctx, Follow::Linear)
                    }
                }
            }
            NodeProcessor::Branch(p) => {
                match with_retries(node, max_retries, || p.process_with_branch(ctx.clone())).await {
                    Ok(out) => {
                        result.message = out.message;
                        result.branch_index = out.branch_index;
                        let next = out.ctx.unwrap_or(ctx);
                        if out.terminate {
                            result.status = NodeStatus::Terminated;
                        } else if next.is_streaming() {
                            result.status = NodeStatus::Streaming;
                        }
                        let follow = match out.branch_index {
                            Some(k) => Follow::Only(k),
                            None => Follow::All,
                        };
                        (next, follow)
                    }
                    Err(e) => {
                        result.status = NodeStatus::Failed;
                        result.error = Some(e.to_string());
                        (ctx, Follow::Linear)
                    }
                }
            }
        }
    }
}

async fn with_retries<T, F, Fut>(node: &WorkflowNode, max_retries: u32, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries = 0;
    loop {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) if tries < max_retries => {
                tries += 1;
                warn!(node_id = %node.id, attempt = tries, error = %e, "pipeline node failed, retrying");
                tokio::time::sleep(Duration::from_secs(node.retry_interval)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Pipeline defaults overlaid with the trigger's overrides.
fn merged_inputs(pipeline: &EventPipeline, trigger: &TriggerContext) -> BTreeMap<String, String> {
    let mut inputs = pipeline.input_defaults();
    inputs.extend(trigger.inputs_overrides.clone());
    inputs
}

fn missing_input<'a>(pipeline: &'a EventPipeline, inputs: &BTreeMap<String, String>) -> Option<&'a str> {
    pipeline
        .inputs
        .iter()
        .filter(|v| v.required)
        .find(|v| inputs.get(&v.key).map_or(true, |value| value.is_empty()))
        .map(|v| v.key.as_str())
}

fn inputs_snapshot(pipeline: &EventPipeline, inputs: &BTreeMap<String, String>) -> String {
    let redacted: BTreeMap<&str, &str> = inputs
        .iter()
        .map(|(k, v)| {
            let secret = pipeline.inputs.iter().any(|i| i.secret && i.key == *k);
            (k.as_str(), if secret { REDACTED } else { v.as_str() })
        })
        .collect();
    serde_json::to_string(&redacted).unwrap_or_else(|_| "{}".into())
}

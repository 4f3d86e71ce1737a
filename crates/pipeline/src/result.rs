//! Outcome of a pipeline execution.

use serde::{Deserialize, Serialize};

use crate::context::StreamChan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Success,
    Failed,
    Skipped,
    /// The node ended the execution, e.g. by dropping the event.
    Terminated,
    Streaming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Streaming,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Streaming => "streaming",
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "streaming" => Ok(Self::Streaming),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_index: Option<usize>,
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub pipeline_id: i64,
    pub pipeline_name: String,
    pub status: ExecutionStatus,
    pub message: String,
    pub error_node: Option<String>,
    pub node_results: Vec<NodeExecutionResult>,
    pub started_at: i64,
    pub finished_at: i64,
    pub duration_ms: u64,
    /// Set when a streaming node ended the execution.
    pub stream_chan: Option<StreamChan>,
}

impl WorkflowResult {
    pub(crate) fn new(pipeline_id: i64, pipeline_name: &str, started_at: i64) -> Self {
        Self {
            pipeline_id,
            pipeline_name: pipeline_name.to_string(),
            status: ExecutionStatus::Success,
            message: String::new(),
            error_node: None,
            node_results: Vec::new(),
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            stream_chan: None,
        }
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>, node: Option<&str>) {
        self.status = ExecutionStatus::Failed;
        self.message = message.into();
        self.error_node = node.map(str::to_string);
    }

    /// Ids of the nodes that produced a result, in execution order.
    pub fn executed(&self) -> Vec<&str> {
        self.node_results.iter().map(|r| r.node_id.as_str()).collect()
    }

    pub fn node(&self, id: &str) -> Option<&NodeExecutionResult> {
        self.node_results.iter().find(|r| r.node_id == id)
    }
}

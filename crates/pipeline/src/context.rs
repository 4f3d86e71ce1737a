//! Per-execution state threaded through the nodes of a pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use vigil_core::AlertEvent;

/// Output channel of a streaming node. The caller drains it after the
/// engine returns.
pub type StreamChan = Arc<Mutex<mpsc::Receiver<String>>>;

/// Who asked for an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Run by the dispatcher for a live event.
    Event,
    /// Run through the API.
    Api,
    /// Dry run from the editor.
    Test,
}

impl TriggerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Api => "api",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an execution was started. Executions without a `mode` are not recorded.
#[derive(Debug, Clone, Default)]
pub struct TriggerContext {
    pub mode: Option<TriggerMode>,
    pub request_id: Option<String>,
    pub trigger_by: String,
    pub inputs_overrides: BTreeMap<String, String>,
    pub stream: bool,
}

impl TriggerContext {
    /// Trigger used by the dispatcher for live events.
    pub fn event() -> Self {
        Self {
            mode: Some(TriggerMode::Event),
            trigger_by: "system".into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Metadata {
    pub start_time: i64,
    pub pipeline_id: i64,
    pub request_id: String,
    pub trigger_mode: String,
    pub trigger_by: String,
}

/// State visible to every node. A node receives a copy and hands back the
/// version later nodes should see.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    /// `None` once a node dropped the event.
    pub event: Option<AlertEvent>,
    pub inputs: BTreeMap<String, String>,
    /// Scratch values nodes pass to each other.
    pub vars: serde_json::Map<String, serde_json::Value>,
    pub metadata: Metadata,
    pub stream: bool,
    pub stream_chan: Option<StreamChan>,
}

impl WorkflowContext {
    /// True when a node turned this context into a streaming output.
    pub fn is_streaming(&self) -> bool {
        self.stream && self.stream_chan.is_some()
    }

    /// Tags of the event, empty when it was dropped.
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.event
            .as_ref()
            .map(|e| e.tags_map.clone())
            .unwrap_or_default()
    }

    /// Values exposed to templates and switch expressions.
    pub fn template_context(&self) -> minijinja::Value {
        minijinja::context! {
            event => &self.event,
            labels => self.labels(),
            inputs => &self.inputs,
            vars => &self.vars,
        }
    }
}

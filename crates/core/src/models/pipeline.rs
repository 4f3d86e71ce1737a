use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tag_filter::{prepare_all, TagFilter};

fn default_max_retries() -> u32 {
    1
}

fn default_retry_interval() -> u64 {
    1
}

/// A processor node in a pipeline DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub continue_on_fail: bool,
    #[serde(default)]
    pub retry_on_fail: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between retries.
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub node: String,
    #[serde(default, rename = "type")]
    pub conn_type: String,
    #[serde(default)]
    pub index: usize,
}

/// Outgoing edges of one node; `main[i]` lists the targets of output `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConnections {
    #[serde(default)]
    pub main: Vec<Vec<ConnectionTarget>>,
}

pub type Connections = HashMap<String, NodeConnections>;

/// Legacy linear processor entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub typ: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A pipeline-level input with a default value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputVariable {
    pub key: String,
    pub value: String,
    pub required: bool,
    /// Redacted in execution snapshots.
    pub secret: bool,
}

/// A user-authored event pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventPipeline {
    pub id: i64,
    pub name: String,
    pub disabled: bool,
    pub filter_enable: bool,
    pub label_filters: Vec<TagFilter>,
    pub processors: Vec<ProcessorConfig>,
    pub nodes: Vec<WorkflowNode>,
    pub connections: Connections,
    pub inputs: Vec<InputVariable>,
    pub update_at: i64,
}

impl EventPipeline {
    pub fn prepare(&mut self) -> Result<()> {
        prepare_all(&mut self.label_filters)
    }

    /// Nodes of the pipeline; legacy processor lists become `node_<i>` nodes.
    pub fn workflow_nodes(&self) -> Vec<WorkflowNode> {
        if !self.nodes.is_empty() {
            return self.nodes.clone();
        }
        self.processors
            .iter()
            .enumerate()
            .map(|(i, p)| WorkflowNode {
                id: format!("node_{i}"),
                name: p.typ.clone(),
                node_type: p.typ.clone(),
                config: p.config.clone(),
                disabled: false,
                continue_on_fail: false,
                retry_on_fail: false,
                max_retries: default_max_retries(),
                retry_interval: default_retry_interval(),
            })
            .collect()
    }

    /// Explicit connections, or a linear chain for legacy processor lists.
    pub fn workflow_connections(&self) -> Connections {
        if !self.connections.is_empty() {
            return self.connections.clone();
        }
        let nodes = self.workflow_nodes();
        nodes
            .windows(2)
            .map(|pair| {
                (
                    pair[0].id.clone(),
                    NodeConnections {
                        main: vec![vec![ConnectionTarget {
                            node: pair[1].id.clone(),
                            conn_type: "main".into(),
                            index: 0,
                        }]],
                    },
                )
            })
            .collect()
    }

    pub fn input_defaults(&self) -> BTreeMap<String, String> {
        self.inputs
            .iter()
            .map(|v| (v.key.clone(), v.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_defaults_from_json() {
        let node: WorkflowNode =
            serde_json::from_str(r#"{"id": "a", "type": "relabel"}"#).unwrap();
        assert_eq!(node.max_retries, 1);
        assert_eq!(node.retry_interval, 1);
        assert!(!node.disabled);
    }

    #[test]
    fn legacy_processors_become_linear_chain() {
        let p = EventPipeline {
            processors: vec![
                ProcessorConfig { typ: "relabel".into(), config: serde_json::Value::Null },
                ProcessorConfig { typ: "annotate".into(), config: serde_json::Value::Null },
                ProcessorConfig { typ: "event_drop".into(), config: serde_json::Value::Null },
            ],
            ..Default::default()
        };
        let nodes = p.workflow_nodes();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[2].id, "node_2");
        let conns = p.workflow_connections();
        assert_eq!(conns.len(), 2);
        assert_eq!(conns["node_0"].main[0][0].node, "node_1");
        assert_eq!(conns["node_1"].main[0][0].node, "node_2");
    }
}

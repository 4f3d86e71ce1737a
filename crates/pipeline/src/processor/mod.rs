//! Node processors and the registry that builds them from node configs.
//!
//! A node's `type` selects a factory; the factory turns the node's JSON
//! `config` into a ready processor. Two kinds exist:
//!
//! - [`Processor`]: transforms the context; returning no context (or one
//!   without an event) drops the event.
//! - [`BranchProcessor`]: additionally picks which output edges to follow.

mod annotate;
mod event_drop;
mod relabel;
mod switch;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::context::WorkflowContext;
use crate::error::{PipelineError, Result};

pub use annotate::Annotate;
pub use event_drop::EventDrop;
pub use relabel::Relabel;
pub use switch::Switch;

/// Output of a plain processor.
#[derive(Debug, Default)]
pub struct Processed {
    /// Context for later nodes; `None` drops the event.
    pub ctx: Option<WorkflowContext>,
    pub message: String,
}

impl Processed {
    pub fn next(ctx: WorkflowContext) -> Self {
        Self {
            ctx: Some(ctx),
            message: String::new(),
        }
    }
}

#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: WorkflowContext) -> Result<Processed>;
}

/// Output of a branch processor.
#[derive(Debug, Default)]
pub struct BranchOutput {
    pub ctx: Option<WorkflowContext>,
    pub message: String,
    /// Output to follow; `None` follows every output.
    pub branch_index: Option<usize>,
    /// End the execution after this node.
    pub terminate: bool,
}

#[async_trait]
pub trait BranchProcessor: Send + Sync {
    async fn process_with_branch(&self, ctx: WorkflowContext) -> Result<BranchOutput>;
}

#[derive(Clone)]
pub enum NodeProcessor {
    Normal(Arc<dyn Processor>),
    Branch(Arc<dyn BranchProcessor>),
}

type Factory = Arc<dyn Fn(&serde_json::Value) -> Result<NodeProcessor> + Send + Sync>;

/// Maps node types to processor factories.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: HashMap<String, Factory>,
}

impl ProcessorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `switch`, `relabel`, `event_drop` and `annotate`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("switch", |cfg| {
            Ok(NodeProcessor::Branch(Arc::new(Switch::from_config(cfg)?)))
        });
        reg.register("relabel", |cfg| {
            Ok(NodeProcessor::Normal(Arc::new(Relabel::from_config(cfg)?)))
        });
        reg.register("event_drop", |cfg| {
            Ok(NodeProcessor::Normal(Arc::new(EventDrop::from_config(cfg)?)))
        });
        reg.register("annotate", |cfg| {
            Ok(NodeProcessor::Normal(Arc::new(Annotate::from_config(cfg)?)))
        });
        reg
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<NodeProcessor> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Build the processor for a node of type `kind`.
    pub fn build(&self, kind: &str, config: &serde_json::Value) -> Result<NodeProcessor> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| PipelineError::UnknownProcessor(kind.to_string()))?;
        factory(config)
    }

    /// Registered node types, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Decode a node config; `null` decodes as the type's default.
pub(crate) fn parse_config<T>(kind: &str, config: &serde_json::Value) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| PipelineError::config(kind, e))
}

/// Take the event out of a context, failing when an earlier node dropped it.
pub(crate) fn require_event(
    kind: &str,
    ctx: &mut WorkflowContext,
) -> Result<vigil_core::AlertEvent> {
    ctx.event
        .take()
        .ok_or_else(|| PipelineError::Processor(format!("{kind}: no event in context")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_are_registered() {
        let reg = ProcessorRegistry::with_builtins();
        assert_eq!(reg.kinds(), vec!["annotate", "event_drop", "relabel", "switch"]);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let reg = ProcessorRegistry::with_builtins();
        let err = reg.build("ai_summary", &json!({})).err().unwrap();
        assert!(matches!(err, PipelineError::UnknownProcessor(k) if k == "ai_summary"));
    }

    #[test]
    fn bad_config_is_reported() {
        let reg = ProcessorRegistry::with_builtins();
        let err = reg.build("relabel", &json!({"set": 5})).err().unwrap();
        assert!(matches!(err, PipelineError::Config { .. }));
    }
}

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_config, require_event, Processed, Processor};
use crate::context::WorkflowContext;
use crate::error::Result;

/// Sets and removes event tags.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Relabel {
    pub set: BTreeMap<String, String>,
    pub remove: Vec<String>,
}

impl Relabel {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        parse_config("relabel", config)
    }
}

#[async_trait]
impl Processor for Relabel {
    async fn process(&self, mut ctx: WorkflowContext) -> Result<Processed> {
        let mut event = require_event("relabel", &mut ctx)?;
        for key in &self.remove {
            event.tags_map.remove(key);
        }
        for (k, v) in &self.set {
            event.tags_map.insert(k.clone(), v.clone());
        }
        event.sync_tags();
        ctx.event = Some(event);
        Ok(Processed::next(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_core::AlertEvent;

    #[tokio::test]
    async fn sets_and_removes_tags() {
        let p = Relabel::from_config(&json!({"set": {"team": "sre"}, "remove": ["pod"]})).unwrap();
        let mut event = AlertEvent::default();
        event.set_tag("pod", "web-1");
        event.set_tag("env", "prod");
        let ctx = WorkflowContext { event: Some(event), ..Default::default() };

        let out = p.process(ctx).await.unwrap().ctx.unwrap().event.unwrap();
        assert_eq!(out.tags, vec!["env=prod".to_string(), "team=sre".into()]);
    }

    #[tokio::test]
    async fn dropped_event_is_an_error() {
        let p = Relabel::default();
        assert!(p.process(WorkflowContext::default()).await.is_err());
    }
}

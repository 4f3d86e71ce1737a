use async_trait::async_trait;
use serde::Deserialize;
use vigil_core::tag_filter::prepare_all;
use vigil_core::{match_tags, TagFilter};

use super::{parse_config, require_event, Processed, Processor};
use crate::context::WorkflowContext;
use crate::error::{PipelineError, Result};

/// Drops events whose tags match every filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EventDrop {
    pub label_filters: Vec<TagFilter>,
}

impl EventDrop {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let mut p: Self = parse_config("event_drop", config)?;
        if p.label_filters.is_empty() {
            return Err(PipelineError::config("event_drop", "label_filters cannot be empty"));
        }
        prepare_all(&mut p.label_filters)?;
        Ok(p)
    }
}

#[async_trait]
impl Processor for EventDrop {
    async fn process(&self, mut ctx: WorkflowContext) -> Result<Processed> {
        let event = require_event("event_drop", &mut ctx)?;
        if match_tags(&event.tags_map, &self.label_filters) {
            return Ok(Processed {
                ctx: Some(ctx),
                message: format!("event {} dropped", event.hash),
            });
        }
        ctx.event = Some(event);
        Ok(Processed::next(ctx))
    }
}

//! Applies a rule's pipelines to an event before it is stored and notified.

use std::sync::Arc;

use tracing::{debug, info};
use vigil_core::{match_tags, AlertEvent, EventPipeline};

use crate::context::TriggerContext;
use crate::engine::Engine;
use crate::result::ExecutionStatus;

pub struct PipelineRunner {
    engine: Arc<Engine>,
}

impl PipelineRunner {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Enabled, and its label filters (when switched on) match the event.
    pub fn applies(pipeline: &EventPipeline, event: &AlertEvent) -> bool {
        !pipeline.disabled
            && (!pipeline.filter_enable || match_tags(&event.tags_map, &pipeline.label_filters))
    }

    /// Run `pipelines` in order. A failed pipeline leaves the event as it
    /// was before that pipeline. Returns `None` once a pipeline drops it.
    pub async fn run(&self, pipelines: &[Arc<EventPipeline>], mut event: AlertEvent) -> Option<AlertEvent> {
        for pipeline in pipelines {
            if !Self::applies(pipeline, &event) {
                debug!(pipeline_id = pipeline.id, hash = %event.hash, "pipeline filtered out");
                continue;
            }
            let (out, result) = self
                .engine
                .execute(pipeline, event.clone(), &TriggerContext::event())
                .await;
            if result.status == ExecutionStatus::Failed {
                continue;
            }
            match out {
                Some(next) => event = next,
                None => {
                    info!(
                        pipeline_id = pipeline.id,
                        rule_id = event.rule_id,
                        hash = %event.hash,
                        "event dropped by pipeline"
                    );
                    return None;
                }
            }
        }
        Some(event)
    }
}

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_config, require_event, Processed, Processor};
use crate::context::WorkflowContext;
use crate::error::{PipelineError, Result};

/// Sets event annotations. Values are templates rendered against the
/// event, its labels, the pipeline inputs and the workflow vars.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Annotate {
    pub annotations: BTreeMap<String, String>,
}

impl Annotate {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let p: Self = parse_config("annotate", config)?;
        {
            let mut env = minijinja::Environment::new();
            for (key, tpl) in &p.annotations {
                env.add_template(key, tpl)
                    .map_err(|e| PipelineError::config("annotate", format!("{key}: {e}")))?;
            }
        }
        Ok(p)
    }
}

#[async_trait]
impl Processor for Annotate {
    async fn process(&self, mut ctx: WorkflowContext) -> Result<Processed> {
        let env = minijinja::Environment::new();
        let values = ctx.template_context();
        let mut rendered = BTreeMap::new();
        for (key, tpl) in &self.annotations {
            rendered.insert(key.clone(), env.render_str(tpl, &values)?);
        }

        let mut event = require_event("annotate", &mut ctx)?;
        event.annotations.extend(rendered);
        ctx.event = Some(event);
        Ok(Processed::next(ctx))
    }
}

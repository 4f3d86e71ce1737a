//! Routes an event to the output of the first matching case.

use async_trait::async_trait;
use serde::Deserialize;
use vigil_core::tag_filter::prepare_all;
use vigil_core::{match_tags, TagFilter};

use super::{parse_config, BranchOutput, BranchProcessor};
use crate::context::WorkflowContext;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchMode {
    /// Cases match on event tags.
    #[default]
    Tags,
    /// Cases are template expressions over the workflow context.
    Expression,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SwitchCase {
    pub name: String,
    pub label_filters: Vec<TagFilter>,
    pub expression: String,
}

/// Output `i` is taken by case `i`; output `cases.len()` is the fallback.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Switch {
    pub mode: SwitchMode,
    pub cases: Vec<SwitchCase>,
}

impl Switch {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let mut sw: Self = parse_config("switch", config)?;
        match sw.mode {
            SwitchMode::Tags => {
                for case in &mut sw.cases {
                    prepare_all(&mut case.label_filters)?;
                }
            }
            SwitchMode::Expression => {
                let env = minijinja::Environment::new();
                for case in &sw.cases {
                    if case.expression.trim().is_empty() {
                        return Err(PipelineError::config("switch", "case expression cannot be empty"));
                    }
                    if let Err(e) = env.compile_expression(&case.expression) {
                        return Err(PipelineError::config("switch", e));
                    }
                }
            }
        }
        Ok(sw)
    }

    fn matches(&self, case: &SwitchCase, ctx: &WorkflowContext) -> Result<bool> {
        match self.mode {
            SwitchMode::Tags => Ok(match_tags(&ctx.labels(), &case.label_filters)),
            SwitchMode::Expression => {
                let env = minijinja::Environment::new();
                let expr = env.compile_expression(&case.expression)?;
                Ok(expr.eval(ctx.template_context())?.is_true())
            }
        }
    }

    /// Index of the first matching case, or `cases.len()`.
    pub fn select(&self, ctx: &WorkflowContext) -> Result<usize> {
        for (i, case) in self.cases.iter().enumerate() {
            if self.matches(case, ctx)? {
                return Ok(i);
            }
        }
        Ok(self.cases.len())
    }
}

#[async_trait]
impl BranchProcessor for Switch {
    async fn process_with_branch(&self, ctx: WorkflowContext) -> Result<BranchOutput> {
        let index = self.select(&ctx)?;
        let message = match self.cases.get(index) {
            Some(case) if !case.name.is_empty() => format!("matched case {}", case.name),
            Some(_) => format!("matched case {index}"),
            None => "no case matched, default branch".to_string(),
        };
        Ok(BranchOutput {
            ctx: Some(ctx),
            message,
            branch_index: Some(index),
            terminate: false,
        })
    }
}

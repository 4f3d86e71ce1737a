//! Minijinja rendering of message templates against alert events.
//!
//! Templates are arbitrary strings from the template cache (not
//! pre-registered), so a fresh [`minijinja::Environment`] is created per
//! render call. Each event is rendered once per template; channels then
//! pick the rendering for their ident.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use vigil_core::{AlertEvent, MessageTemplate};

use crate::error::Result;

pub const DEFAULT_TITLE: &str = "[{{ status }}] {{ event.rule_name }}";
pub const DEFAULT_CONTENT: &str = "\
Rule: {{ event.rule_name }}
Status: {{ status }}
Severity: S{{ event.severity }}
Cluster: {{ event.cluster }}
{% if event.target_ident %}Target: {{ event.target_ident }}
{% endif %}Value: {{ event.trigger_value }}
Tags: {{ event.tags | join(\", \") }}
Triggered at: {{ event.trigger_time | timeformat }}";

/// Rendered fields (`title`, `content`, ...) of one template.
pub type Fields = BTreeMap<String, String>;

/// All renderings of one event.
#[derive(Debug, Clone, Default)]
pub struct RenderedSet {
    by_ident: HashMap<String, Fields>,
    default: Fields,
}

impl RenderedSet {
    /// Fields for a channel: its own template when one exists, else the
    /// built-in title and content.
    pub fn for_channel(&self, ident: &str) -> &Fields {
        self.by_ident.get(ident).unwrap_or(&self.default)
    }

    pub fn default_fields(&self) -> &Fields {
        &self.default
    }
}

/// Renders notification templates using minijinja.
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Build a configured minijinja environment with custom filters.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("round", round_filter);
        env.add_filter("timeformat", timeformat_filter);
        env
    }

    fn context(event: &AlertEvent) -> minijinja::Value {
        minijinja::context! {
            event => event,
            status => event.status_label(),
            labels => &event.tags_map,
            annotations => &event.annotations,
            is_recovered => event.is_recovered,
        }
    }

    /// Render one template string against an event.
    pub fn render(&self, template_str: &str, event: &AlertEvent) -> Result<String> {
        let env = Self::build_env();
        Ok(env.render_str(template_str, Self::context(event))?)
    }

    /// Render every field of a template. Fields that fail are logged and
    /// left out.
    pub fn render_template(&self, tpl: &MessageTemplate, event: &AlertEvent) -> Fields {
        tpl.content
            .iter()
            .filter_map(|(field, src)| match self.render(src, event) {
                Ok(out) => Some((field.clone(), out)),
                Err(e) => {
                    tracing::warn!(
                        template = %tpl.ident,
                        field = %field,
                        hash = %event.hash,
                        error = %e,
                        "template render failed"
                    );
                    None
                }
            })
            .collect()
    }

    /// Render the event once per template, plus the built-in default.
    pub fn render_all(&self, templates: &[Arc<MessageTemplate>], event: &AlertEvent) -> RenderedSet {
        let mut default = Fields::new();
        for (field, src) in [("title", DEFAULT_TITLE), ("content", DEFAULT_CONTENT)] {
            match self.render(src, event) {
                Ok(out) => {
                    default.insert(field.to_string(), out);
                }
                Err(e) => tracing::warn!(field, error = %e, "default template render failed"),
            }
        }

        let by_ident = templates
            .iter()
            .map(|tpl| (tpl.ident.clone(), self.render_template(tpl, event)))
            .collect();
        RenderedSet { by_ident, default }
    }
}

/// Custom filter: round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

/// Custom filter: unix seconds as `YYYY-MM-DD HH:MM:SS` UTC.
fn timeformat_filter(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

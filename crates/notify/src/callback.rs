//! Rule callbacks: plain URLs get the event POSTed, `${ibex}/...` URLs
//! start a remediation task on the target host.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_cache::CacheSet;
use vigil_core::config::IbexConfig;
use vigil_core::{AlertEvent, TaskTemplate};

use crate::error::{NotifyError, Result};
use crate::http::HttpSender;

pub const IBEX_PREFIX: &str = "${ibex}";
const CALLBACK_ATTEMPTS: u32 = 3;
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// What a callback URL asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Http(String),
    Ibex { template_id: i64, host: Option<String> },
}

impl Callback {
    /// `None` for blank or malformed entries.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some(rest) = raw.strip_prefix(IBEX_PREFIX) {
            let mut parts = rest.trim_start_matches('/').split('/');
            let template_id = parts.next()?.parse().ok()?;
            let host = parts.next().filter(|h| !h.is_empty()).map(str::to_string);
            return Some(Callback::Ibex { template_id, host });
        }
        let url = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        Some(Callback::Http(url))
    }
}

/// Task creation request sent to the job executor.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskForm {
    pub title: String,
    pub account: String,
    pub batch: i64,
    pub tolerance: i64,
    pub timeout: i64,
    pub pause: String,
    pub script: String,
    pub args: String,
    pub stdin: String,
    pub action: String,
    pub creator: String,
    pub hosts: Vec<String>,
    pub alert_triggered: bool,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(default)]
    err: String,
    #[serde(default)]
    dat: serde_json::Value,
}

pub struct CallbackSender {
    http: HttpSender,
    ibex: IbexConfig,
}

impl CallbackSender {
    pub fn new(http: HttpSender, ibex: IbexConfig) -> Self {
        Self { http, ibex }
    }

    pub async fn send(&self, raw: &str, event: &AlertEvent, caches: &CacheSet) -> Result<()> {
        match Callback::parse(raw) {
            None => Err(NotifyError::Config(format!("invalid callback: {raw:?}"))),
            Some(Callback::Http(url)) => {
                self.http
                    .post_json(&url, event, CALLBACK_ATTEMPTS, CALLBACK_TIMEOUT)
                    .await
            }
            Some(Callback::Ibex { template_id, host }) => {
                if event.is_recovered {
                    debug!(hash = %event.hash, "skipping ibex callback for recovered event");
                    return Ok(());
                }
                let host = host.unwrap_or_else(|| event.target_ident.clone());
                self.start_task(template_id, &host, event, caches).await
            }
        }
    }

    async fn start_task(&self, template_id: i64, host: &str, event: &AlertEvent, caches: &CacheSet) -> Result<()> {
        if host.is_empty() {
            return Err(NotifyError::Callback("ibex callback has no host".into()));
        }
        let Some(address) = self.ibex.address.as_deref().filter(|_| self.ibex.is_configured()) else {
            return Err(NotifyError::Config("ibex address is not configured".into()));
        };
        let tpl = caches
            .task_templates
            .get(&template_id)
            .ok_or_else(|| NotifyError::Callback(format!("task template {template_id} not found")))?;
        check_permission(&tpl, host, caches)?;

        let form = task_form(&tpl, host, event)?;
        let url = format!("{}/ibex/v1/tasks", address.trim_end_matches('/'));
        let mut req = self
            .http
            .client()
            .post(&url)
            .timeout(Duration::from_millis(self.ibex.timeout_ms.max(1)))
            .json(&form);
        if let Some(user) = &self.ibex.basic_auth_user {
            req = req.basic_auth(user, self.ibex.basic_auth_pass.as_deref());
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Status { url, status: status.as_u16(), body });
        }
        let out: TaskResponse = resp.json().await?;
        if !out.err.is_empty() {
            return Err(NotifyError::Callback(out.err));
        }
        info!(template_id, host, task = %out.dat, rule_id = event.rule_id, "ibex task started");
        Ok(())
    }
}

/// The template's last editor must be an admin or own the host's business
/// group.
fn check_permission(tpl: &TaskTemplate, host: &str, caches: &CacheSet) -> Result<()> {
    let admin = caches
        .users
        .get_all()
        .into_iter()
        .find(|u| u.username == tpl.update_by)
        .map(|u| u.is_admin())
        .unwrap_or(false);
    if admin {
        return Ok(());
    }
    match caches.targets.get(&host.to_string()) {
        Some(t) if t.group_id == tpl.group_id => Ok(()),
        Some(_) => Err(NotifyError::Callback(format!(
            "{} has no permission to run template {} on {host}",
            tpl.update_by, tpl.id
        ))),
        None => {
            warn!(host, "ibex host is not a known target");
            Err(NotifyError::Callback(format!("host {host} not found")))
        }
    }
}

fn task_form(tpl: &TaskTemplate, host: &str, event: &AlertEvent) -> Result<TaskForm> {
    let mut stdin = event.tags_map.clone();
    stdin.insert("alert_severity".into(), event.severity.to_string());
    stdin.insert("alert_trigger_value".into(), event.trigger_value.clone());
    let stdin = serde_json::to_string(&stdin)
        .map_err(|e| NotifyError::Config(format!("failed to encode task stdin: {e}")))?;
    Ok(TaskForm {
        title: format!("{} FH: {host}", tpl.title),
        account: tpl.account.clone(),
        batch: tpl.batch,
        tolerance: tpl.tolerance,
        timeout: tpl.timeout,
        pause: tpl.pause.clone(),
        script: tpl.script.clone(),
        args: tpl.args.clone(),
        stdin,
        action: "start".into(),
        creator: tpl.update_by.clone(),
        hosts: vec![host.to_string()],
        alert_triggered: true,
    })
}

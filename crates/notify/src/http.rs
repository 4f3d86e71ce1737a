//! HTTP delivery: notify channels of type `http`, webhooks and plain
//! callback URLs.
//!
//! Channel URLs and header values are sent exactly as configured.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use vigil_core::{AlertEvent, HttpRequestConfig};

use crate::error::{NotifyError, Result};
use crate::templating::Fields;

/// Shared HTTP client (connection pooling) plus retry policy.
#[derive(Debug, Clone, Default)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// POST `body` as JSON, trying up to `attempts` times.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        attempts: u32,
        timeout: Duration,
    ) -> Result<()> {
        let payload = serde_json::to_string(body)
            .map_err(|e| NotifyError::Config(format!("failed to serialize payload: {e}")))?;
        self.with_retries(url, attempts, Duration::from_millis(100), || {
            self.client
                .post(url)
                .timeout(timeout)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(payload.clone())
        })
        .await
    }

    /// Deliver one rendered notification through an HTTP channel. The
    /// caller holds the channel's concurrency permit.
    pub async fn send_channel(&self, cfg: &HttpRequestConfig, body: String) -> Result<()> {
        let url = cfg.url.as_str();
        let method = parse_method(&cfg.method)?;
        let timeout = Duration::from_millis(cfg.timeout_ms.max(1));
        let interval = Duration::from_millis(cfg.retry_interval_ms);

        self.with_retries(url, cfg.retry_times, interval, || {
            let mut req = self
                .client
                .request(method.clone(), url)
                .timeout(timeout)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
            for (k, v) in &cfg.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            if !cfg.basic_auth_user.is_empty() {
                req = req.basic_auth(&cfg.basic_auth_user, Some(&cfg.basic_auth_pass));
            }
            req
        })
        .await
    }

    async fn with_retries<F>(&self, url: &str, attempts: u32, interval: Duration, build: F) -> Result<()>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let attempts = attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(interval).await;
            }
            match build().send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(url = %url, attempt, "http notification delivered");
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<unreadable body>".to_string());
                    warn!(url = %url, status, attempt, "http notification returned non-2xx status");
                    last = Some(NotifyError::Status {
                        url: url.to_string(),
                        status,
                        body,
                    });
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "http notification failed");
                    last = Some(NotifyError::Http(e));
                }
            }
        }
        Err(last.unwrap_or_else(|| NotifyError::Config(format!("no request made to {url}"))))
    }
}

/// Request body for an HTTP channel: the channel's body template when set,
/// else `{event, title, content, sendtos}` as JSON.
pub fn channel_body(
    cfg: &HttpRequestConfig,
    event: Option<&AlertEvent>,
    fields: &Fields,
    sendtos: &[String],
) -> Result<String> {
    let title = fields.get("title").map(String::as_str).unwrap_or("");
    let content = fields.get("content").map(String::as_str).unwrap_or("");
    match &cfg.body {
        Some(tpl) if !tpl.trim().is_empty() => {
            let env = minijinja::Environment::new();
            Ok(env.render_str(
                tpl,
                minijinja::context! {
                    event => event,
                    tpl => fields,
                    title => title,
                    content => content,
                    sendtos => sendtos,
                    sendto => sendtos.join(","),
                },
            )?)
        }
        _ => serde_json::to_string(&serde_json::json!({
            "event": event,
            "title": title,
            "content": content,
            "sendtos": sendtos,
        }))
        .map_err(|e| NotifyError::Config(format!("failed to serialize notification: {e}"))),
    }
}

fn parse_method(method: &str) -> Result<reqwest::Method> {
    if method.trim().is_empty() {
        return Ok(reqwest::Method::POST);
    }
    method
        .trim()
        .to_uppercase()
        .parse::<reqwest::Method>()
        .map_err(|_| NotifyError::Config(format!("invalid HTTP method: {method}")))
}

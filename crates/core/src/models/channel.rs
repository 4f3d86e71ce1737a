use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Transport a notify channel uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    #[default]
    Http,
    Smtp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRequestConfig {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: u64,
    /// Max parallel requests to this destination.
    pub concurrency: usize,
    pub retry_times: u32,
    pub retry_interval_ms: u64,
    pub basic_auth_user: String,
    #[serde(skip_serializing)]
    pub basic_auth_pass: String,
    /// Optional minijinja body; defaults to the event JSON.
    pub body: Option<String>,
}

impl Default for HttpRequestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".into(),
            headers: BTreeMap::new(),
            timeout_ms: 10_000,
            concurrency: 5,
            retry_times: 3,
            retry_interval_ms: 100,
            basic_auth_user: String::new(),
            basic_auth_pass: String::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpRequestConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub from: String,
    pub insecure_skip_verify: bool,
    /// Messages per connection before it is recycled; 0 uses the default.
    pub batch: usize,
}

/// A delivery channel (webhook-style HTTP or SMTP).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyChannel {
    pub id: i64,
    pub name: String,
    /// Referenced by rules' `notify_channels`.
    pub ident: String,
    pub enable: bool,
    pub request_type: RequestType,
    /// Which user contact field addresses recipients on this channel.
    pub contact_key: String,
    pub http: Option<HttpRequestConfig>,
    pub smtp: Option<SmtpRequestConfig>,
    pub update_at: i64,
}

impl NotifyChannel {
    pub fn http_concurrency(&self) -> usize {
        self.http
            .as_ref()
            .map(|h| h.concurrency.max(1))
            .unwrap_or(1)
    }
}

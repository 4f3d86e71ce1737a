//! Delivery of one rendered notification over one notify channel.

use std::sync::Arc;

use tracing::{debug, warn};
use vigil_cache::{CacheSet, MailMessage};
use vigil_core::{AlertEvent, NotifyChannel, RequestType, User};

use crate::error::{NotifyError, Result};
use crate::http::{channel_body, HttpSender};
use crate::templating::Fields;

/// Whether a send happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Nobody on the channel had a usable contact.
    NoRecipients,
}

#[derive(Clone, Default)]
pub struct ChannelSender {
    http: HttpSender,
}

impl ChannelSender {
    pub fn new(http: HttpSender) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &HttpSender {
        &self.http
    }

    pub async fn send(
        &self,
        caches: &CacheSet,
        channel: &NotifyChannel,
        event: Option<&AlertEvent>,
        fields: &Fields,
        users: &[Arc<User>],
    ) -> Result<Delivery> {
        let key = contact_key(channel);
        let sendtos = contacts(key, users);
        if key.is_some() && sendtos.is_empty() {
            debug!(channel = %channel.ident, "no recipient has a contact for this channel");
            return Ok(Delivery::NoRecipients);
        }

        match channel.request_type {
            RequestType::Http => self.send_http(caches, channel, event, fields, &sendtos).await,
            RequestType::Smtp => self.send_smtp(caches, channel, fields, sendtos).await,
        }
    }

    async fn send_http(
        &self,
        caches: &CacheSet,
        channel: &NotifyChannel,
        event: Option<&AlertEvent>,
        fields: &Fields,
        sendtos: &[String],
    ) -> Result<Delivery> {
        let cfg = channel
            .http
            .as_ref()
            .ok_or_else(|| NotifyError::Config(format!("channel {} has no http config", channel.ident)))?;

        // The semaphore is closed when the channel cache rebuilds; the
        // replacement is fetched once and a second miss sends unthrottled.
        let mut permit = None;
        for _ in 0..2 {
            let Some(sem) = caches.channels.http_semaphore(channel.id) else { break };
            match sem.acquire_owned().await {
                Ok(p) => {
                    permit = Some(p);
                    break;
                }
                Err(_) => continue,
            }
        }
        if permit.is_none() {
            warn!(channel = %channel.ident, "no concurrency permit, sending without limit");
        }

        let body = channel_body(cfg, event, fields, sendtos)?;
        self.http.send_channel(cfg, body).await?;
        drop(permit);
        Ok(Delivery::Sent)
    }

    async fn send_smtp(
        &self,
        caches: &CacheSet,
        channel: &NotifyChannel,
        fields: &Fields,
        to: Vec<String>,
    ) -> Result<Delivery> {
        if to.is_empty() {
            return Ok(Delivery::NoRecipients);
        }
        let handle = caches
            .channels
            .smtp_sender(channel.id)
            .ok_or_else(|| NotifyError::Smtp(format!("no smtp sender for channel {}", channel.ident)))?;
        let msg = MailMessage {
            to,
            subject: fields.get("title").cloned().unwrap_or_default(),
            html: fields.get("content").cloned().unwrap_or_default(),
        };
        if handle.send(msg).await {
            Ok(Delivery::Sent)
        } else {
            Err(NotifyError::Smtp(format!("smtp sender for {} is closed", channel.ident)))
        }
    }
}

/// Contact field that addresses users on `channel`, if any.
fn contact_key(channel: &NotifyChannel) -> Option<&str> {
    match (channel.contact_key.as_str(), channel.request_type) {
        ("", RequestType::Smtp) => Some("email"),
        ("", RequestType::Http) => None,
        (key, _) => Some(key),
    }
}

fn contacts(key: Option<&str>, users: &[Arc<User>]) -> Vec<String> {
    let Some(key) = key else { return Vec::new() };
    let mut out: Vec<String> = users
        .iter()
        .filter_map(|u| u.contact(key).map(str::to_string))
        .collect();
    out.sort();
    out.dedup();
    out
}

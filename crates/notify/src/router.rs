//! Who gets an event: users per channel, webhooks and callbacks.
//!
//! Routers add recipients and are combined with [`NotifyTarget::or_merge`].
//! Interceptors remove them and are applied with [`NotifyTarget::and_merge`],
//! so a channel stays on for a user only if every interceptor agrees.

use std::collections::{BTreeMap, BTreeSet};

use vigil_cache::CacheSet;
use vigil_core::AlertEvent;

/// Channel ident to "send on this channel".
pub type ChannelFlags = BTreeMap<String, bool>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyTarget {
    users: BTreeMap<i64, ChannelFlags>,
    webhooks: BTreeSet<String>,
    callbacks: BTreeSet<String>,
}

impl NotifyTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_channel(&mut self, user_id: i64, channel: impl Into<String>, on: bool) {
        self.users.entry(user_id).or_default().insert(channel.into(), on);
    }

    pub fn add_webhook(&mut self, url: impl Into<String>) {
        self.webhooks.insert(url.into());
    }

    pub fn add_callback(&mut self, url: impl Into<String>) {
        self.callbacks.insert(url.into());
    }

    /// Union: a channel is on if either side turns it on.
    pub fn or_merge(&mut self, other: &NotifyTarget) {
        for (uid, flags) in &other.users {
            let mine = self.users.entry(*uid).or_default();
            for (ch, on) in flags {
                let cur = mine.entry(ch.clone()).or_insert(false);
                *cur = *cur || *on;
            }
        }
        self.webhooks.extend(other.webhooks.iter().cloned());
        self.callbacks.extend(other.callbacks.iter().cloned());
    }

    /// Intersection on the channels `other` has an opinion about.
    pub fn and_merge(&mut self, other: &NotifyTarget) {
        for (uid, flags) in &other.users {
            if let Some(mine) = self.users.get_mut(uid) {
                for (ch, on) in flags {
                    if let Some(cur) = mine.get_mut(ch) {
                        *cur = *cur && *on;
                    }
                }
            }
        }
    }

    /// Users with `channel` switched on, in id order.
    pub fn channel_users(&self, channel: &str) -> Vec<i64> {
        self.users
            .iter()
            .filter(|(_, flags)| flags.get(channel).copied().unwrap_or(false))
            .map(|(uid, _)| *uid)
            .collect()
    }

    /// Channels at least one user has switched on.
    pub fn channels(&self) -> BTreeSet<String> {
        self.users
            .values()
            .flat_map(|flags| flags.iter().filter(|(_, on)| **on).map(|(ch, _)| ch.clone()))
            .collect()
    }

    pub fn users(&self) -> impl Iterator<Item = (&i64, &ChannelFlags)> {
        self.users.iter()
    }

    pub fn webhooks(&self) -> &BTreeSet<String> {
        &self.webhooks
    }

    pub fn callbacks(&self) -> &BTreeSet<String> {
        &self.callbacks
    }
}

/// Adds recipients for an event.
pub trait Router: Send + Sync {
    fn route(&self, event: &AlertEvent, caches: &CacheSet) -> NotifyTarget;
}

/// Vetoes recipients already chosen by the routers.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, event: &AlertEvent, current: &NotifyTarget, caches: &CacheSet) -> NotifyTarget;
}

/// Members of the event's notify groups, on each of its channels.
pub struct GroupRouter;

impl Router for GroupRouter {
    fn route(&self, event: &AlertEvent, caches: &CacheSet) -> NotifyTarget {
        let mut target = NotifyTarget::new();
        for user in caches.users_in_groups(&event.notify_groups) {
            for ch in &event.notify_channels {
                target.set_channel(user.id, ch.clone(), true);
            }
        }
        target
    }
}

/// Webhooks set on the event (by a subscription), else the global ones.
/// Subscription clones never fall back to the global webhooks.
pub struct WebhookRouter {
    global: Vec<String>,
}

impl WebhookRouter {
    pub fn new(global: Vec<String>) -> Self {
        Self { global }
    }
}

impl Router for WebhookRouter {
    fn route(&self, event: &AlertEvent, _caches: &CacheSet) -> NotifyTarget {
        let mut target = NotifyTarget::new();
        let urls = if !event.webhooks.is_empty() || event.is_subscribe {
            &event.webhooks
        } else {
            &self.global
        };
        for url in urls.iter().filter(|u| !u.trim().is_empty()) {
            target.add_webhook(url.trim());
        }
        target
    }
}

/// Callback URLs configured on the rule.
pub struct CallbackRouter;

impl Router for CallbackRouter {
    fn route(&self, event: &AlertEvent, _caches: &CacheSet) -> NotifyTarget {
        let mut target = NotifyTarget::new();
        for url in event.callbacks.iter().filter(|u| !u.trim().is_empty()) {
            target.add_callback(url.trim());
        }
        target
    }
}

/// Switches channels off for every user, e.g. during a channel outage.
pub struct ChannelBlocklist {
    blocked: BTreeSet<String>,
}

impl ChannelBlocklist {
    pub fn new(blocked: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocked: blocked.into_iter().collect(),
        }
    }
}

impl Interceptor for ChannelBlocklist {
    fn intercept(&self, _event: &AlertEvent, current: &NotifyTarget, _caches: &CacheSet) -> NotifyTarget {
        let mut veto = NotifyTarget::new();
        for (uid, flags) in current.users() {
            for ch in flags.keys().filter(|ch| self.blocked.contains(*ch)) {
                veto.set_channel(*uid, ch.clone(), false);
            }
        }
        veto
    }
}

/// The routers and interceptors applied to every event.
pub struct RoutePlan {
    routers: Vec<Box<dyn Router>>,
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl RoutePlan {
    pub fn new() -> Self {
        Self {
            routers: Vec::new(),
            interceptors: Vec::new(),
        }
    }

    /// Group members, webhooks and callbacks.
    pub fn standard(global_webhooks: Vec<String>) -> Self {
        Self::new()
            .with_router(GroupRouter)
            .with_router(WebhookRouter::new(global_webhooks))
            .with_router(CallbackRouter)
    }

    pub fn with_router(mut self, router: impl Router + 'static) -> Self {
        self.routers.push(Box::new(router));
        self
    }

    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn route(&self, event: &AlertEvent, caches: &CacheSet) -> NotifyTarget {
        let mut target = NotifyTarget::new();
        for r in &self.routers {
            target.or_merge(&r.route(event, caches));
        }
        for i in &self.interceptors {
            let veto = i.intercept(event, &target, caches);
            target.and_merge(&veto);
        }
        target
    }
}

impl Default for RoutePlan {
    fn default() -> Self {
        Self::new()
    }
}

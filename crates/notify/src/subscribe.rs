//! Subscription rewrites: clones of an event sent to extra recipients.

use vigil_cache::CacheSet;
use vigil_core::{match_tags, AlertEvent, AlertSubscribe};

/// True when `sub` wants `event`.
pub fn matches(sub: &AlertSubscribe, event: &AlertEvent) -> bool {
    if sub.disabled || !sub.matches_datasource(event.datasource_id) {
        return false;
    }
    if !sub.prod.is_empty() && sub.prod != event.rule_prod {
        return false;
    }
    if !match_tags(&event.tags_map, &sub.tags) {
        return false;
    }
    if sub.for_duration > 0 && event.trigger_time - event.first_trigger_time < sub.for_duration {
        return false;
    }
    sub.matches_severity(event.severity)
}

/// The clone of `event` a subscription sends.
pub fn apply(sub: &AlertSubscribe, event: &AlertEvent) -> AlertEvent {
    let mut out = event.clone();
    if sub.redefine_severity {
        out.severity = sub.new_severity;
    }
    if sub.redefine_channels {
        out.notify_channels = sub.new_channels.clone();
    }
    if sub.redefine_webhooks {
        out.webhooks = sub.webhooks.clone();
    }
    out.notify_groups = sub.user_group_ids.clone();
    out.is_subscribe = true;
    out
}

/// Clones for every matching subscription of the event's rule and of the
/// catch-all rule id 0. Subscription clones never produce further clones.
pub fn subscribed_events(caches: &CacheSet, event: &AlertEvent) -> Vec<AlertEvent> {
    if event.is_subscribe {
        return Vec::new();
    }
    let mut subs = caches.subscribes_for_rule(event.rule_id);
    if event.rule_id != 0 {
        subs.extend(caches.subscribes_for_rule(0));
    }
    subs.iter()
        .filter(|s| matches(s, event))
        .map(|s| {
            tracing::debug!(subscribe_id = s.id, hash = %event.hash, "event subscribed");
            apply(s, event)
        })
        .collect()
}

//! Mute chain: each predicate may suppress an event; the first hit wins.

use std::fmt;

use tracing::warn;
use vigil_cache::{CacheSet, SnapshotCache};
use vigil_core::time_window::{parse_days, ts_in_window};
use vigil_core::{match_tags, AlertEvent, AlertMute, AlertRule, MuteTimeType, Target};

/// Why an event was suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteReason {
    RuleDisabled,
    OutsideEffectiveTime,
    BgScope,
    UserMute(i64),
}

impl fmt::Display for MuteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuteReason::RuleDisabled => write!(f, "rule disabled"),
            MuteReason::OutsideEffectiveTime => write!(f, "outside effective time"),
            MuteReason::BgScope => write!(f, "target outside business group"),
            MuteReason::UserMute(id) => write!(f, "mute {id}"),
        }
    }
}

/// Disabled rules and triggers outside the rule's daily window are muted.
pub fn time_effective_muted(rule: &AlertRule, event: &AlertEvent) -> Option<MuteReason> {
    if rule.disabled {
        return Some(MuteReason::RuleDisabled);
    }
    match ts_in_window(
        &rule.enable_stime,
        &rule.enable_etime,
        &rule.enable_days_of_week,
        event.trigger_time,
    ) {
        Ok(true) => None,
        Ok(false) => Some(MuteReason::OutsideEffectiveTime),
        Err(e) => {
            warn!(rule_id = rule.id, error = %e, "invalid effective time, not muting");
            None
        }
    }
}

/// The event's target is not in the rule's business group.
///
/// A target missing from the cache only mutes when the query is not a
/// liveness check: for those a missing target means the host is down.
pub fn bg_scope_muted(rule: &AlertRule, event: &AlertEvent, targets: &SnapshotCache<Target>) -> bool {
    if !rule.enable_in_bg || event.target_ident.is_empty() {
        return false;
    }
    match targets.get(&event.target_ident) {
        Some(t) => t.group_id != rule.group_id,
        None => !rule.is_target_up_query(),
    }
}

/// Whether one user mute covers the event.
pub fn mute_matches(mute: &AlertMute, event: &AlertEvent) -> bool {
    if mute.disabled {
        return false;
    }
    if !mute.prod.is_empty() && !event.rule_prod.is_empty() && mute.prod != event.rule_prod {
        return false;
    }
    if !mute.matches_datasource(event.datasource_id) || !mute.matches_severity(event.severity) {
        return false;
    }

    let in_time = match mute.mute_time_type {
        MuteTimeType::TimeRange => event.trigger_time >= mute.btime && event.trigger_time <= mute.etime,
        MuteTimeType::Periodic => mute.periodic_mutes.iter().any(|p| {
            let days = parse_days(&p.enable_days_of_week);
            ts_in_window(&p.enable_stime, &p.enable_etime, &days, event.trigger_time).unwrap_or_else(|e| {
                warn!(mute_id = mute.id, error = %e, "invalid periodic mute window");
                false
            })
        }),
    };

    in_time && match_tags(&event.tags_map, &mute.tags)
}

/// First mute of the event's group that covers it. Recoveries are never
/// user-muted so that a notified fire always gets its recovery.
pub fn user_muted<'a, I>(event: &AlertEvent, mutes: I) -> Option<i64>
where
    I: IntoIterator<Item = &'a AlertMute>,
{
    if event.is_recovered {
        return None;
    }
    mutes
        .into_iter()
        .find(|m| m.group_id == event.group_id && mute_matches(m, event))
        .map(|m| m.id)
}

/// Run the full chain.
pub fn is_muted(rule: &AlertRule, event: &AlertEvent, caches: &CacheSet) -> Option<MuteReason> {
    if let Some(reason) = time_effective_muted(rule, event) {
        return Some(reason);
    }
    if bg_scope_muted(rule, event, &caches.targets) {
        return Some(MuteReason::BgScope);
    }
    let mutes = caches.mutes_for_group(event.group_id);
    user_muted(event, mutes.iter().map(|m| m.as_ref())).map(MuteReason::UserMute)
}

//! MD5-based identity hashes for events and rule workers.

use std::collections::BTreeMap;

/// Lowercase hex MD5 of `input`.
pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Canonical label-set serialization used inside event hashes.
///
/// Labels are emitted sorted by key as `{k="v", k2="v2"}`; `__name__` is
/// excluded so renaming a metric does not fork an alert.
pub fn vector_key(labels: &BTreeMap<String, String>) -> String {
    let body: Vec<String> = labels
        .iter()
        .filter(|(k, _)| k.as_str() != "__name__")
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect();
    format!("{{{}}}", body.join(", "))
}

/// Event identity: stable for a given rule, series and cluster.
pub fn event_hash(rule_id: i64, labels: &BTreeMap<String, String>, cluster: &str) -> String {
    md5_hex(&format!("{}_{}_{}", rule_id, vector_key(labels), cluster))
}

/// Worker identity: changes whenever a field that requires an evaluator
/// restart changes.
pub fn rule_worker_hash(rule_id: i64, eval_interval: i64, query: &str, cluster: &str) -> String {
    md5_hex(&format!("{}_{}_{}_{}", rule_id, eval_interval, query, cluster))
}

/// First eight bytes of an event hash as an integer key.
pub fn hash_to_u64(hash: &str) -> u64 {
    let prefix = hash.get(..16).unwrap_or(hash);
    u64::from_str_radix(prefix, 16).unwrap_or_else(|_| {
        let digest = md5::compute(hash.as_bytes());
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&digest.0[..8]);
        u64::from_be_bytes(buf)
    })
}

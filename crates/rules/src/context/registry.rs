use std::collections::HashMap;

use vigil_core::AlertEvent;

/// Per-context alert state keyed by event hash.
///
/// `pendings` holds events accumulating their `for_duration`; `fires` holds
/// events that have been pushed at least once and not yet recovered.
#[derive(Debug, Default)]
pub struct FiringRegistry {
    pub pendings: HashMap<String, AlertEvent>,
    pub fires: HashMap<String, AlertEvent>,
}

impl FiringRegistry {
    pub fn is_firing(&self, hash: &str) -> bool {
        self.fires.contains_key(hash)
    }

    pub fn is_pending(&self, hash: &str) -> bool {
        self.pendings.contains_key(hash)
    }
}

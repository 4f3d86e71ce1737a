//! Shared application state handed to every HTTP handler.

use std::sync::Arc;

use vigil_cache::{AlertStatusCache, CacheSet};
use vigil_core::Stats;
use vigil_pipeline::ExecutionStore;
use vigil_queue::EventQueue;
use vigil_rules::RingRegistry;

pub struct AppState {
    pub endpoint: String,
    pub stats: Arc<Stats>,
    pub queue: Arc<EventQueue>,
    pub alert_status: Arc<AlertStatusCache>,
    pub caches: CacheSet,
    pub ring: Arc<RingRegistry>,
    pub executions: Arc<dyn ExecutionStore>,
}

//! Alerting data model shared by every crate.

pub mod channel;
pub mod datasource;
pub mod event;
pub mod mute;
pub mod pipeline;
pub mod rule;
pub mod subscribe;
pub mod target;
pub mod task_tpl;
pub mod template;
pub mod user;

pub use channel::{HttpRequestConfig, NotifyChannel, RequestType, SmtpRequestConfig};
pub use datasource::DatasourceInfo;
pub use event::{format_trigger_value, parse_tag_pairs, AlertEvent};
pub use mute::{AlertMute, MuteTimeType, PeriodicMute};
pub use pipeline::{
    ConnectionTarget, Connections, EventPipeline, InputVariable, NodeConnections,
    ProcessorConfig, WorkflowNode,
};
pub use rule::{AlertRule, PipelineRef};
pub use subscribe::AlertSubscribe;
pub use target::Target;
pub use task_tpl::TaskTemplate;
pub use template::MessageTemplate;
pub use user::{User, UserGroup};

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::Result;

/// An entity held in a snapshot cache.
pub trait CacheItem: Clone + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;

    fn cache_key(&self) -> Self::Key;

    /// Validate and precompute derived state after loading.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }
}

macro_rules! id_keyed {
    ($($ty:ty),* $(,)?) => {
        $(impl CacheItem for $ty {
            type Key = i64;
            fn cache_key(&self) -> i64 {
                self.id
            }
        })*
    };
}

id_keyed!(AlertRule, NotifyChannel, DatasourceInfo, TaskTemplate, MessageTemplate, User, UserGroup);

impl CacheItem for AlertMute {
    type Key = i64;
    fn cache_key(&self) -> i64 {
        self.id
    }
    fn prepare(&mut self) -> Result<()> {
        AlertMute::prepare(self)
    }
}

impl CacheItem for AlertSubscribe {
    type Key = i64;
    fn cache_key(&self) -> i64 {
        self.id
    }
    fn prepare(&mut self) -> Result<()> {
        AlertSubscribe::prepare(self)
    }
}

impl CacheItem for EventPipeline {
    type Key = i64;
    fn cache_key(&self) -> i64 {
        self.id
    }
    fn prepare(&mut self) -> Result<()> {
        EventPipeline::prepare(self)
    }
}

impl CacheItem for Target {
    type Key = String;
    fn cache_key(&self) -> String {
        self.ident.clone()
    }
}

//! Rule evaluation for the alerting engine.
//!
//! This crate provides:
//! - Consistent hash rings that split rules across replicas, fed by heartbeats
//! - The [`Scheduler`] that reconciles running rule contexts with the rule cache
//! - [`RuleContext`]: the per-rule evaluator and firing state machine
//! - The mute chain (effective time, business-group scope, user mutes)
//! - The datasource trait and a Prometheus HTTP implementation

pub mod context;
pub mod datasource;
pub mod error;
pub mod mute;
pub mod ring;
pub mod scheduler;
pub mod store;

pub use context::{FiringRegistry, RuleContext, RuleDeps};
pub use datasource::{Datasource, DatasourceProvider, PrometheusProvider, QueryResult, Vector};
pub use error::{QueryError, Result, RuleError};
pub use mute::{is_muted, MuteReason};
pub use ring::{HashRing, Heartbeat, HeartbeatStore, HeartbeatTask, MemoryHeartbeatStore, RingRegistry};
pub use scheduler::{ExternalRules, Scheduler, SyncReport};
pub use store::{EventStore, MemoryEventStore};

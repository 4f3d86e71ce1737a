//! In-memory snapshots feeding the alerting engine.
//!
//! Each [`SnapshotCache`] mirrors one backing table and polls a cheap
//! statistics summary, reloading only when the summary changes. A handful of
//! side caches carry extra behavior: [`NotifyChannelCache`] owns per-channel
//! send resources, [`AlertStatusCache`] throttles by admission, and
//! [`IdentCount`] keeps short-lived per-host counters.

pub mod alert_status;
pub mod channel;
pub mod error;
pub mod ident_count;
pub mod set;
pub mod snapshot;
pub mod source;

pub use alert_status::{AlertStatus, AlertStatusCache};
pub use channel::{MailMessage, NoSmtp, NotifyChannelCache, SmtpHandle, SmtpLauncher};
pub use error::{CacheError, Result};
pub use ident_count::IdentCount;
pub use set::{CacheSet, CacheSources};
pub use snapshot::{spawn_refresher, Refreshable, SnapshotCache};
pub use source::{CacheSource, MemorySource, Statistics};

//! PostgreSQL implementations of the engine's store traits.
//!
//! Cache tables share one layout: `id`, a JSONB `data` column holding the
//! serialized model, and an `update_at` unix timestamp the statistics check
//! reads. Writers (the admin side) own those tables; the engine only reads.

mod events;
mod executions;
mod heartbeat;
mod source;

pub use events::PgEventStore;
pub use executions::PgExecutionStore;
pub use heartbeat::PgHeartbeatStore;
pub use source::{pg_sources, PgSource};

//! Reconciles running rule contexts with the rule cache and hash ring.
//!
//! Every sync tick computes the desired set of contexts (one per rule and
//! selected cluster that this replica owns) keyed by the context's
//! restart-sensitive hash, then starts what is missing and stops what is no
//! longer wanted. Rules fed by an external anomaly source are kept in a
//! separate registry and never ticked.

mod core;
mod external;

#[cfg(test)]
mod tests;

pub use self::core::{Scheduler, SyncReport};
pub use self::external::ExternalRules;

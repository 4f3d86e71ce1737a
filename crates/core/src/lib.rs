pub mod clock;
pub mod config;
pub mod error;
pub mod hash;
pub mod models;
pub mod stats;
pub mod tag_filter;
pub mod time_window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::*;
pub use models::*;
pub use stats::{Stats, StatsSnapshot};
pub use tag_filter::{match_tags, TagFilter, TagOp};

//! Notification side of the alerting engine.
//!
//! This crate provides:
//! - The [`Dispatcher`] that consumes fired events, runs pipelines,
//!   persists and fans notifications out
//! - Routing ([`RoutePlan`]) with additive routers and vetoing interceptors
//! - Subscription rewrites
//! - Minijinja template rendering
//! - HTTP channel, webhook and callback delivery (including `${ibex}` tasks)
//! - The per-channel SMTP sender loop
//! - Maintainer error reports

pub mod callback;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod maintainer;
pub mod router;
pub mod sender;
pub mod smtp;
pub mod subscribe;
pub mod templating;

pub use callback::{Callback, CallbackSender};
pub use dispatcher::{Dispatcher, DispatcherDeps, DispatcherOptions, NotifyReport};
pub use error::{NotifyError, Result};
pub use http::HttpSender;
pub use maintainer::MaintainerNotifier;
pub use router::{ChannelBlocklist, Interceptor, NotifyTarget, RoutePlan, Router};
pub use sender::{ChannelSender, Delivery};
pub use smtp::{Dialer, LettreDialer, LettreLauncher, Mailer, SmtpLoop};
pub use templating::{RenderedSet, TemplateRenderer};

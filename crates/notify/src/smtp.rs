//! Dedicated sender loop per SMTP channel.
//!
//! The loop keeps one connection open across messages. It dials lazily on
//! the first message, redials and resends once when a send fails, and
//! closes the connection after `batch` messages or after it has been idle
//! for the idle timeout. Dialing retries forever with a fixed backoff until
//! the loop is told to quit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use vigil_cache::{MailMessage, SmtpHandle, SmtpLauncher};
use vigil_core::config::SmtpDefaults;
use vigil_core::{NotifyChannel, SmtpRequestConfig};

use crate::error::{NotifyError, Result};

const DIAL_BACKOFF: Duration = Duration::from_secs(1);
const QUEUE_CAPACITY: usize = 1024;

/// An open mail connection.
#[async_trait]
pub trait Mailer: Send {
    async fn send(&mut self, msg: &MailMessage) -> Result<()>;
    async fn close(&mut self);
}

/// Opens mail connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Box<dyn Mailer>>;
}

pub struct SmtpLoop {
    name: String,
    dialer: Arc<dyn Dialer>,
    batch: usize,
    idle: Duration,
    backoff: Duration,
}

impl SmtpLoop {
    pub fn new(name: impl Into<String>, dialer: Arc<dyn Dialer>, batch: usize, idle: Duration) -> Self {
        Self {
            name: name.into(),
            dialer,
            batch: batch.max(1),
            idle,
            backoff: DIAL_BACKOFF,
        }
    }

    /// Start the loop on the runtime and return its handle.
    pub fn spawn(self) -> SmtpHandle {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (quit_tx, quit_rx) = watch::channel(false);
        tokio::spawn(self.run(rx, quit_rx));
        SmtpHandle::new(tx, quit_tx)
    }

    /// Dial until it works. `None` when told to quit first.
    async fn dial(&self, quit: &mut watch::Receiver<bool>) -> Option<Box<dyn Mailer>> {
        loop {
            if *quit.borrow() {
                return None;
            }
            match self.dialer.dial().await {
                Ok(m) => return Some(m),
                Err(e) => {
                    warn!(channel = %self.name, error = %e, "smtp dial failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(self.backoff) => {}
                        res = quit.changed() => {
                            if res.is_err() {
                                return None;
                            }
                        }
                    }
                }
            }
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<MailMessage>, mut quit: watch::Receiver<bool>) {
        let mut conn: Option<Box<dyn Mailer>> = None;
        let mut size = 0usize;

        'outer: loop {
            if *quit.borrow() {
                break;
            }
            tokio::select! {
                res = quit.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let mut mailer = match conn.take() {
                        Some(m) => m,
                        None => match self.dial(&mut quit).await {
                            Some(m) => m,
                            None => break,
                        },
                    };

                    if let Err(e) = mailer.send(&msg).await {
                        warn!(channel = %self.name, error = %e, "smtp send failed, redialing");
                        mailer.close().await;
                        mailer = match self.dial(&mut quit).await {
                            Some(m) => m,
                            None => break 'outer,
                        };
                        if let Err(e) = mailer.send(&msg).await {
                            error!(channel = %self.name, error = %e, to = ?msg.to, "smtp send failed twice");
                        }
                    }

                    size += 1;
                    if size >= self.batch {
                        debug!(channel = %self.name, size, "smtp batch done, closing connection");
                        mailer.close().await;
                        size = 0;
                    } else {
                        conn = Some(mailer);
                    }
                }
                _ = tokio::time::sleep(self.idle), if conn.is_some() => {
                    if let Some(mut m) = conn.take() {
                        debug!(channel = %self.name, "smtp connection idle, closing");
                        m.close().await;
                    }
                    size = 0;
                }
            }
        }

        if let Some(mut m) = conn.take() {
            m.close().await;
        }
        info!(channel = %self.name, "smtp sender stopped");
    }
}

// -- lettre ----------------------------------------------------------------

/// Dials the channel's SMTP server with lettre.
pub struct LettreDialer {
    cfg: SmtpRequestConfig,
    from: Mailbox,
}

impl LettreDialer {
    pub fn new(cfg: SmtpRequestConfig) -> Result<Self> {
        if cfg.host.is_empty() {
            return Err(NotifyError::Config("smtp host is required".into()));
        }
        let from: Mailbox = cfg
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;
        Ok(Self { cfg, from })
    }

    fn port(&self) -> u16 {
        if self.cfg.port == 0 {
            587
        } else {
            self.cfg.port
        }
    }

    /// Implicit TLS on 465, STARTTLS elsewhere.
    fn tls_mode(&self) -> TlsMode {
        if self.port() == 465 {
            TlsMode::Wrapper
        } else {
            TlsMode::StartTls
        }
    }

    fn tls_parameters(&self) -> Result<TlsParameters> {
        TlsParameters::builder(self.cfg.host.clone())
            .dangerous_accept_invalid_certs(self.cfg.insecure_skip_verify)
            .build()
            .map_err(|e| NotifyError::Config(e.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let params = self.tls_parameters()?;
        let tls = match self.tls_mode() {
            TlsMode::Wrapper => Tls::Wrapper(params),
            TlsMode::StartTls => Tls::Required(params),
        };
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.cfg.host)
            .port(self.port())
            .tls(tls);
        if !self.cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.cfg.username.clone(),
                self.cfg.password.clone(),
            ));
        }
        Ok(builder.build())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsMode {
    Wrapper,
    StartTls,
}

#[async_trait]
impl Dialer for LettreDialer {
    async fn dial(&self) -> Result<Box<dyn Mailer>> {
        let transport = self.transport()?;
        let ok = transport
            .test_connection()
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        if !ok {
            return Err(NotifyError::Smtp(format!("{} refused the connection", self.cfg.host)));
        }
        Ok(Box::new(LettreMailer {
            transport: Some(transport),
            from: self.from.clone(),
        }))
    }
}

struct LettreMailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

#[async_trait]
impl Mailer for LettreMailer {
    async fn send(&mut self, msg: &MailMessage) -> Result<()> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| NotifyError::Smtp("connection closed".into()))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(&msg.subject)
            .header(ContentType::TEXT_HTML);
        let mut recipients = 0;
        for addr in &msg.to {
            match addr.parse::<Mailbox>() {
                Ok(mb) => {
                    builder = builder.to(mb);
                    recipients += 1;
                }
                Err(e) => warn!(address = %addr, error = %e, "skipping invalid recipient"),
            }
        }
        if recipients == 0 {
            return Err(NotifyError::Config("at least one recipient is required".into()));
        }
        let email = builder
            .body(msg.html.clone())
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        Ok(())
    }

    async fn close(&mut self) {
        self.transport = None;
    }
}

/// Starts a lettre-backed [`SmtpLoop`] for each SMTP channel.
pub struct LettreLauncher {
    defaults: SmtpDefaults,
}

impl LettreLauncher {
    pub fn new(defaults: SmtpDefaults) -> Self {
        Self { defaults }
    }
}

impl SmtpLauncher for LettreLauncher {
    fn launch(&self, channel: &NotifyChannel) -> Option<SmtpHandle> {
        let cfg = channel.smtp.clone()?;
        let batch = if cfg.batch == 0 { self.defaults.batch } else { cfg.batch };
        let dialer = match LettreDialer::new(cfg) {
            Ok(d) => d,
            Err(e) => {
                warn!(channel = %channel.ident, error = %e, "invalid smtp channel config");
                return None;
            }
        };
        let idle = Duration::from_secs(self.defaults.idle_timeout_secs.max(1));
        Some(SmtpLoop::new(channel.ident.clone(), Arc::new(dialer), batch, idle).spawn())
    }
}

//! Internal error reports to the maintainer group (failed event
//! persistence and the like).

use tracing::{debug, warn};
use vigil_cache::CacheSet;
use vigil_core::config::MaintainerConfig;

use crate::sender::{ChannelSender, Delivery};
use crate::templating::Fields;

pub struct MaintainerNotifier {
    cfg: MaintainerConfig,
    sender: ChannelSender,
}

impl MaintainerNotifier {
    pub fn new(cfg: MaintainerConfig, sender: ChannelSender) -> Self {
        Self { cfg, sender }
    }

    pub fn is_configured(&self) -> bool {
        self.cfg.group_id.is_some() && !self.cfg.channels.is_empty()
    }

    /// Send `title`/`content` over every maintainer channel. Returns how
    /// many channels delivered.
    pub async fn notify(&self, caches: &CacheSet, title: &str, content: &str) -> usize {
        let Some(group_id) = self.cfg.group_id else {
            debug!("no maintainer group configured, dropping report: {title}");
            return 0;
        };
        let users = caches.users_in_groups(&[group_id]);
        if users.is_empty() {
            warn!(group_id, "maintainer group has no members");
            return 0;
        }
        let fields = Fields::from([
            ("title".to_string(), title.to_string()),
            ("content".to_string(), content.to_string()),
        ]);

        let mut delivered = 0;
        for ident in &self.cfg.channels {
            let Some(channel) = caches.channels.get_by_ident(ident) else {
                warn!(channel = %ident, "maintainer channel not found");
                continue;
            };
            match self.sender.send(caches, &channel, None, &fields, &users).await {
                Ok(Delivery::Sent) => delivered += 1,
                Ok(Delivery::NoRecipients) => {}
                Err(e) => warn!(channel = %ident, error = %e, "maintainer report failed"),
            }
        }
        delivered
    }
}

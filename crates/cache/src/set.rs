//! Every snapshot the alerting engine reads, built and started together.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use vigil_core::{
    AlertMute, AlertRule, AlertSubscribe, DatasourceInfo, EventPipeline, MessageTemplate,
    NotifyChannel, Target, TaskTemplate, User, UserGroup,
};

use crate::channel::{NotifyChannelCache, SmtpLauncher};
use crate::error::Result;
use crate::snapshot::{spawn_refresher, Refreshable, SnapshotCache};
use crate::source::{CacheSource, MemorySource};

/// Backing stores for a [`CacheSet`].
pub struct CacheSources {
    pub rules: Arc<dyn CacheSource<AlertRule>>,
    pub mutes: Arc<dyn CacheSource<AlertMute>>,
    pub subscribes: Arc<dyn CacheSource<AlertSubscribe>>,
    pub targets: Arc<dyn CacheSource<Target>>,
    pub users: Arc<dyn CacheSource<User>>,
    pub user_groups: Arc<dyn CacheSource<UserGroup>>,
    pub channels: Arc<dyn CacheSource<NotifyChannel>>,
    pub pipelines: Arc<dyn CacheSource<EventPipeline>>,
    pub templates: Arc<dyn CacheSource<MessageTemplate>>,
    pub datasources: Arc<dyn CacheSource<DatasourceInfo>>,
    pub task_templates: Arc<dyn CacheSource<TaskTemplate>>,
}

impl CacheSources {
    /// Empty in-memory sources; replace the fields that matter.
    pub fn empty() -> Self {
        Self {
            rules: Arc::new(MemorySource::<AlertRule>::new(vec![])),
            mutes: Arc::new(MemorySource::<AlertMute>::new(vec![])),
            subscribes: Arc::new(MemorySource::<AlertSubscribe>::new(vec![])),
            targets: Arc::new(MemorySource::<Target>::new(vec![])),
            users: Arc::new(MemorySource::<User>::new(vec![])),
            user_groups: Arc::new(MemorySource::<UserGroup>::new(vec![])),
            channels: Arc::new(MemorySource::<NotifyChannel>::new(vec![])),
            pipelines: Arc::new(MemorySource::<EventPipeline>::new(vec![])),
            templates: Arc::new(MemorySource::<MessageTemplate>::new(vec![])),
            datasources: Arc::new(MemorySource::<DatasourceInfo>::new(vec![])),
            task_templates: Arc::new(MemorySource::<TaskTemplate>::new(vec![])),
        }
    }
}

#[derive(Clone)]
pub struct CacheSet {
    pub rules: Arc<SnapshotCache<AlertRule>>,
    pub mutes: Arc<SnapshotCache<AlertMute>>,
    pub subscribes: Arc<SnapshotCache<AlertSubscribe>>,
    pub targets: Arc<SnapshotCache<Target>>,
    pub users: Arc<SnapshotCache<User>>,
    pub user_groups: Arc<SnapshotCache<UserGroup>>,
    pub channels: Arc<NotifyChannelCache>,
    pub pipelines: Arc<SnapshotCache<EventPipeline>>,
    pub templates: Arc<SnapshotCache<MessageTemplate>>,
    pub datasources: Arc<SnapshotCache<DatasourceInfo>>,
    pub task_templates: Arc<SnapshotCache<TaskTemplate>>,
}

impl CacheSet {
    /// Initial load of every snapshot. Any failure aborts.
    pub async fn load(sources: CacheSources, smtp: Arc<dyn SmtpLauncher>) -> Result<Self> {
        Ok(Self {
            rules: Arc::new(SnapshotCache::new("alert_rules", sources.rules).await?),
            mutes: Arc::new(SnapshotCache::new("alert_mutes", sources.mutes).await?),
            subscribes: Arc::new(SnapshotCache::new("alert_subscribes", sources.subscribes).await?),
            targets: Arc::new(SnapshotCache::new("targets", sources.targets).await?),
            users: Arc::new(SnapshotCache::new("users", sources.users).await?),
            user_groups: Arc::new(SnapshotCache::new("user_groups", sources.user_groups).await?),
            channels: Arc::new(NotifyChannelCache::new(sources.channels, smtp).await?),
            pipelines: Arc::new(SnapshotCache::new("event_pipelines", sources.pipelines).await?),
            templates: Arc::new(SnapshotCache::new("message_templates", sources.templates).await?),
            datasources: Arc::new(SnapshotCache::new("datasources", sources.datasources).await?),
            task_templates: Arc::new(
                SnapshotCache::new("task_templates", sources.task_templates).await?,
            ),
        })
    }

    fn refreshables(&self) -> Vec<Arc<dyn Refreshable>> {
        vec![
            self.rules.clone(),
            self.mutes.clone(),
            self.subscribes.clone(),
            self.targets.clone(),
            self.users.clone(),
            self.user_groups.clone(),
            self.channels.clone(),
            self.pipelines.clone(),
            self.templates.clone(),
            self.datasources.clone(),
            self.task_templates.clone(),
        ]
    }

    /// One refresher task per snapshot.
    pub fn start(&self, interval: Duration, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.refreshables()
            .into_iter()
            .map(|c| spawn_refresher(c, interval, shutdown.clone()))
            .collect()
    }

    /// Refresh every snapshot once; used by tests and at warm-up.
    pub async fn refresh_all(&self) -> Result<()> {
        for cache in self.refreshables() {
            cache.refresh().await?;
        }
        Ok(())
    }

    /// Mutes owned by a business group.
    pub fn mutes_for_group(&self, group_id: i64) -> Vec<Arc<AlertMute>> {
        let mut mutes: Vec<_> = self
            .mutes
            .get_all()
            .into_iter()
            .filter(|m| m.group_id == group_id)
            .collect();
        mutes.sort_by_key(|m| m.id);
        mutes
    }

    /// Subscriptions of one rule id (0 for the global ones).
    pub fn subscribes_for_rule(&self, rule_id: i64) -> Vec<Arc<AlertSubscribe>> {
        let mut subs: Vec<_> = self
            .subscribes
            .get_all()
            .into_iter()
            .filter(|s| s.rule_id == rule_id)
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    /// Distinct members of the given user groups, in id order.
    pub fn users_in_groups(&self, group_ids: &[i64]) -> Vec<Arc<User>> {
        let ids: BTreeSet<i64> = group_ids
            .iter()
            .filter_map(|gid| self.user_groups.get(gid))
            .flat_map(|g| g.user_ids.clone())
            .collect();
        ids.into_iter().filter_map(|id| self.users.get(&id)).collect()
    }

    /// Clusters a rule runs against: enabled datasources it selects.
    pub fn clusters_for_rule(&self, rule: &AlertRule) -> Vec<Arc<DatasourceInfo>> {
        let mut ds: Vec<_> = self
            .datasources
            .get_all()
            .into_iter()
            .filter(|d| !d.disabled && rule.matches_datasource(d.id))
            .collect();
        ds.sort_by_key(|d| d.id);
        ds
    }

    pub fn datasource_by_cluster(&self, cluster: &str) -> Option<Arc<DatasourceInfo>> {
        self.datasources
            .snapshot()
            .values()
            .find(|d| d.name == cluster)
            .cloned()
    }
}

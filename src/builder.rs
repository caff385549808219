//! 引擎构建器 - 进程启动时创建一次全部服务，按引用注入给协作方

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::info;

use crate::badge::BadgeCounter;
use crate::channel::ChannelRegistrar;
use crate::config::EngineConfig;
use crate::connectivity::ConnectivityWatcher;
use crate::ingest::IngestionPipeline;
use crate::lifecycle::{Components, LifecycleCoordinator};
use crate::notification::{DeliveryDeduplicator, NotificationStore, OfflineQueue};
use crate::permission::PermissionGate;
use crate::platform::{
    ConnectivityProbe, Navigator, NotificationPresenter, PermissionPlatform, PushProvider,
};
use crate::storage::KeyValueStore;
use crate::sync::QueueDrainer;

/// 引擎构建器
pub struct EngineBuilder {
    config: EngineConfig,
    kv: Option<Arc<dyn KeyValueStore>>,
    presenter: Option<Arc<dyn NotificationPresenter>>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    permission: Option<Arc<dyn PermissionPlatform>>,
    push: Option<Arc<dyn PushProvider>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            kv: None,
            presenter: None,
            probe: None,
            permission: None,
            push: None,
            navigator: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置持久化存储
    pub fn storage(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    pub fn presenter(mut self, presenter: Arc<dyn NotificationPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn permission(mut self, permission: Arc<dyn PermissionPlatform>) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn push_provider(mut self, push: Arc<dyn PushProvider>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// 构建协调器（缺少任一协作方时报错）
    pub fn build(self) -> Result<Arc<LifecycleCoordinator>> {
        self.config.validate()?;
        let kv = self.kv.ok_or_else(|| anyhow!("storage is required"))?;
        let presenter = self
            .presenter
            .ok_or_else(|| anyhow!("notification presenter is required"))?;
        let probe = self
            .probe
            .ok_or_else(|| anyhow!("connectivity probe is required"))?;
        let permission = self
            .permission
            .ok_or_else(|| anyhow!("permission platform is required"))?;
        let push = self.push.ok_or_else(|| anyhow!("push provider is required"))?;
        let navigator = self.navigator.ok_or_else(|| anyhow!("navigator is required"))?;

        let store = Arc::new(NotificationStore::new(kv.clone(), self.config.capacity));
        let queue = Arc::new(OfflineQueue::new(kv.clone()));
        let badge = Arc::new(BadgeCounter::new(kv.clone()));
        let watcher = ConnectivityWatcher::new(probe);
        let drainer = Arc::new(QueueDrainer::new(store.clone(), queue.clone(), kv.clone()));
        let pipeline = IngestionPipeline::new(
            store.clone(),
            queue.clone(),
            badge.clone(),
            watcher.clone(),
            presenter.clone(),
        )
        .with_deduplicator(DeliveryDeduplicator::new().with_window(self.config.dedup_window()))
        .with_drainer(drainer.clone());

        info!(
            capacity = store.capacity(),
            channel = %self.config.channel.id,
            "Building notification engine"
        );

        Ok(Arc::new(LifecycleCoordinator::new(Components {
            kv,
            store,
            queue,
            badge,
            permission: PermissionGate::new(permission),
            channel: ChannelRegistrar::new(presenter.clone(), self.config.channel),
            watcher,
            drainer,
            pipeline,
            presenter,
            push,
            navigator,
        })))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

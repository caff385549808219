//! 生命周期协调器 - 串联权限、渠道、摄取、同步和点击处理
//!
//! 本身不持有新的业务状态，只负责在正确的时机调用各组件：
//! - 冷启动：检查权限 → 未授权则请求 → 获取并保存 token → 注册渠道 → 启动网络监听 → 联网时同步一次
//! - 回到前台：重新检查权限和网络，联网则同步离线队列
//! - 点击通知：标记已读 → 通知界面刷新 → 交给导航层打开深链

use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::badge::BadgeCounter;
use crate::channel::ChannelRegistrar;
use crate::connectivity::ConnectivityWatcher;
use crate::error::{DrainError, IngestError, StorageResult};
use crate::ingest::{DeliveryContext, IngestOutcome, IngestionPipeline};
use crate::notification::{Notification, NotificationStore, OfflineQueue, RawPayload, DEFAULT_KIND};
use crate::permission::{PermissionGate, PermissionState};
use crate::platform::{
    DeepLink, Navigator, NotificationPresenter, OpenedEvent, PushProvider, Subscription,
};
use crate::storage::{read_string, KeyValueStore, PUSH_TOKEN_KEY};
use crate::sync::{DrainOutcome, QueueDrainer};

/// 冷启动结果（启动从不因推送能力缺失而失败）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartupReport {
    /// 最终权限状态；平台调用失败时为 `None`
    pub permission: Option<PermissionState>,
    pub token: Option<String>,
    pub channel_id: Option<String>,
    pub reachable: bool,
    /// 启动时的离线队列同步结果（断网或同步失败时为 `None`）
    pub drain: Option<DrainOutcome>,
    /// 启动同步失败的原因
    pub drain_error: Option<String>,
}

impl StartupReport {
    /// 本次会话是否具备推送能力
    pub fn push_enabled(&self) -> bool {
        self.permission.map(PermissionState::is_granted).unwrap_or(false)
    }
}

/// 协调器依赖的全部组件
pub struct Components {
    pub kv: Arc<dyn KeyValueStore>,
    pub store: Arc<NotificationStore>,
    pub queue: Arc<OfflineQueue>,
    pub badge: Arc<BadgeCounter>,
    pub permission: PermissionGate,
    pub channel: ChannelRegistrar,
    pub watcher: Arc<ConnectivityWatcher>,
    pub drainer: Arc<QueueDrainer>,
    pub pipeline: IngestionPipeline,
    pub presenter: Arc<dyn NotificationPresenter>,
    pub push: Arc<dyn PushProvider>,
    pub navigator: Arc<dyn Navigator>,
}

pub struct LifecycleCoordinator {
    kv: Arc<dyn KeyValueStore>,
    store: Arc<NotificationStore>,
    queue: Arc<OfflineQueue>,
    badge: Arc<BadgeCounter>,
    permission: PermissionGate,
    channel: ChannelRegistrar,
    watcher: Arc<ConnectivityWatcher>,
    drainer: Arc<QueueDrainer>,
    pipeline: IngestionPipeline,
    presenter: Arc<dyn NotificationPresenter>,
    push: Arc<dyn PushProvider>,
    navigator: Arc<dyn Navigator>,
    /// 推送回调注册句柄
    attachments: Mutex<Vec<Subscription>>,
    /// 同步器作为联网监听器的注册句柄
    _drain_listener: Subscription,
}

impl LifecycleCoordinator {
    pub fn new(components: Components) -> Self {
        let drain_listener = components.watcher.add_listener(components.drainer.clone());
        Self {
            kv: components.kv,
            store: components.store,
            queue: components.queue,
            badge: components.badge,
            permission: components.permission,
            channel: components.channel,
            watcher: components.watcher,
            drainer: components.drainer,
            pipeline: components.pipeline,
            presenter: components.presenter,
            push: components.push,
            navigator: components.navigator,
            attachments: Mutex::new(Vec::new()),
            _drain_listener: drain_listener,
        }
    }

    /// 冷启动流程
    pub async fn startup(&self) -> StartupReport {
        let mut report = StartupReport::default();

        report.permission = self.resolve_permission().await;
        if report.push_enabled() {
            report.token = self.refresh_token().await;
            match self.channel.ensure_channel().await {
                Ok(channel_id) => report.channel_id = Some(channel_id),
                Err(e) => warn!(error = %e, "Channel registration failed"),
            }
        } else {
            info!(
                permission = ?report.permission,
                "Push notifications unavailable for this session"
            );
        }

        // 初始同步在这里显式执行，以便报告本次的真实结果
        report.reachable = self.watcher.observe().await;
        if report.reachable {
            match self.drainer.drain().await {
                Ok(outcome) => report.drain = Some(outcome),
                Err(e) => report.drain_error = Some(e.to_string()),
            }
        }

        info!(
            push_enabled = report.push_enabled(),
            reachable = report.reachable,
            drain = ?report.drain,
            drain_failed = report.drain_error.is_some(),
            "Notification engine started"
        );
        report
    }

    async fn resolve_permission(&self) -> Option<PermissionState> {
        let current = match self.permission.check_permission().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Permission check failed");
                return None;
            }
        };

        match current {
            PermissionState::NotDetermined => match self.permission.request_permission().await {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(error = %e, "Permission request failed");
                    None
                }
            },
            // 拒绝在本会话内是终态，不再请求
            settled => Some(settled),
        }
    }

    /// 获取推送 token 并持久化
    async fn refresh_token(&self) -> Option<String> {
        match self.push.get_token().await {
            Ok(token) => {
                self.persist_token(&token).await;
                Some(token)
            }
            Err(e) => {
                warn!(error = %e, "Failed to resolve push token");
                None
            }
        }
    }

    async fn persist_token(&self, token: &str) {
        if let Err(e) = self.kv.set(PUSH_TOKEN_KEY, token.as_bytes().to_vec()).await {
            warn!(error = %e, "Failed to persist push token");
        } else {
            debug!("Push token persisted");
        }
    }

    /// 已保存的推送 token
    pub async fn stored_token(&self) -> StorageResult<Option<String>> {
        read_string(self.kv.as_ref(), PUSH_TOKEN_KEY).await
    }

    /// 应用回到前台
    pub async fn on_foreground(&self) -> Result<Option<DrainOutcome>, DrainError> {
        if let Err(e) = self.permission.check_permission().await {
            warn!(error = %e, "Permission re-check failed");
        }

        if self.watcher.refresh().await {
            self.drainer.drain().await.map(Some)
        } else {
            debug!("Still offline on foreground, skipping drain");
            Ok(None)
        }
    }

    /// 摄取推送并在数据变化时通知界面
    pub async fn ingest(
        &self,
        payload: &RawPayload,
        context: DeliveryContext,
    ) -> Result<IngestOutcome, IngestError> {
        let outcome = self.pipeline.ingest(payload, context).await?;
        if outcome.notification().is_some() {
            self.navigator.notifications_changed();
        }
        Ok(outcome)
    }

    /// 用户点击通知
    ///
    /// 找不到对应记录（已被淘汰或仍在离线队列）时仍然导航，只是不标记已读。
    pub async fn on_notification_opened(&self, event: OpenedEvent) -> StorageResult<DeepLink> {
        let found = self.resolve_opened(&event).await?;

        let link = match &found {
            Some(n) => {
                self.store.mark_read(&n.id).await?;
                self.navigator.notifications_changed();
                deep_link(&n.id, &n.data)
            }
            None => {
                let id = event
                    .notification_id
                    .clone()
                    .or_else(|| event.message_id.clone())
                    .unwrap_or_default();
                debug!(id = %id, "Opened notification not in store");
                deep_link(&id, &event.data)
            }
        };

        self.navigator.open(link.clone());
        Ok(link)
    }

    async fn resolve_opened(&self, event: &OpenedEvent) -> StorageResult<Option<Notification>> {
        if let Some(id) = &event.notification_id {
            if let Some(n) = self.store.get(id).await? {
                return Ok(Some(n));
            }
        }
        if let Some(message_id) = &event.message_id {
            return self.store.find_by_message_id(message_id).await;
        }
        Ok(None)
    }

    /// 注册推送服务的全部回调，直到 `detach`
    pub async fn attach(self: &Arc<Self>) {
        let handle = Handle::current();
        let mut subscriptions = Vec::with_capacity(4);

        subscriptions.push(self.push.on_foreground_message(
            self.message_handler(handle.clone(), DeliveryContext::Foreground),
        ));
        subscriptions.push(self.push.on_background_message(
            self.message_handler(handle.clone(), DeliveryContext::Background),
        ));

        let weak = Arc::downgrade(self);
        let rt = handle.clone();
        subscriptions.push(self.push.on_notification_opened(Arc::new(move |event: OpenedEvent| {
            if let Some(coordinator) = weak.upgrade() {
                rt.spawn(async move {
                    if let Err(e) = coordinator.on_notification_opened(event).await {
                        warn!(error = %e, "Failed to handle notification tap");
                    }
                });
            }
        })));

        let weak = Arc::downgrade(self);
        let rt = handle;
        subscriptions.push(self.push.on_token_refresh(Arc::new(move |token: String| {
            if let Some(coordinator) = weak.upgrade() {
                rt.spawn(async move {
                    info!("Push token refreshed");
                    coordinator.persist_token(&token).await;
                });
            }
        })));

        if let Ok(mut attachments) = self.attachments.lock() {
            attachments.extend(subscriptions);
        }
        info!("Attached to push provider");
    }

    fn message_handler(
        self: &Arc<Self>,
        handle: Handle,
        context: DeliveryContext,
    ) -> crate::platform::MessageHandler {
        let weak = Arc::downgrade(self);
        Arc::new(move |payload: RawPayload| {
            if let Some(coordinator) = weak.upgrade() {
                handle.spawn(async move {
                    if let Err(e) = coordinator.ingest(&payload, context).await {
                        warn!(context = context.as_str(), error = %e, "Push ingestion failed");
                    }
                });
            }
        })
    }

    /// 注销推送回调
    pub fn detach(&self) {
        if let Ok(mut attachments) = self.attachments.lock() {
            let count = attachments.len();
            for subscription in attachments.drain(..) {
                subscription.unsubscribe();
            }
            if count > 0 {
                debug!(count, "Detached from push provider");
            }
        }
    }

    /// 注销推送回调并停止网络监听
    pub fn shutdown(&self) {
        self.detach();
        self.watcher.stop();
    }

    pub async fn mark_read(&self, id: &str) -> StorageResult<bool> {
        let changed = self.store.mark_read(id).await?;
        if changed {
            self.navigator.notifications_changed();
        }
        Ok(changed)
    }

    /// 全部已读，同时清零角标并同步到平台
    pub async fn mark_all_read(&self) -> StorageResult<usize> {
        let changed = self.store.mark_all_read().await?;
        self.badge.clear().await?;
        if let Err(e) = self.presenter.set_badge_count(0).await {
            warn!(error = %e, "Failed to clear platform badge");
        }
        self.navigator.notifications_changed();
        Ok(changed)
    }

    /// 把角标账本的值推送到平台
    pub async fn sync_badge(&self) -> StorageResult<u64> {
        let count = self.badge.get().await?;
        if let Err(e) = self.presenter.set_badge_count(count).await {
            warn!(count, error = %e, "Failed to sync platform badge");
        }
        Ok(count)
    }

    pub async fn drain(&self) -> Result<DrainOutcome, DrainError> {
        self.drainer.drain().await
    }

    pub async fn notifications(&self) -> StorageResult<Vec<Notification>> {
        self.store.list().await
    }

    pub fn is_reachable(&self) -> bool {
        self.watcher.is_reachable()
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn badge(&self) -> &Arc<BadgeCounter> {
        &self.badge
    }

    pub fn drainer(&self) -> &Arc<QueueDrainer> {
        &self.drainer
    }

    pub fn permission(&self) -> &PermissionGate {
        &self.permission
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        self.detach();
    }
}

fn deep_link(id: &str, data: &std::collections::HashMap<String, String>) -> DeepLink {
    DeepLink {
        kind: data
            .get("type")
            .cloned()
            .unwrap_or_else(|| DEFAULT_KIND.to_string()),
        notification_id: id.to_string(),
        params: data.clone(),
    }
}

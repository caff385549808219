//! 推送摄取管道 - 规范化原始载荷，按网络状态写入存储或离线队列
//!
//! 处理流程：
//! 1. 校验载荷，缺少标题/正文的静默丢弃（很多推送只有 data）
//! 2. 按 message_id 去重（同一推送经前台和后台回调各到一次）
//! 3. 读取缓存的可达性（不发起网络探测）
//! 4. 并发执行两个互不影响的副作用：
//!    - 数据路径：联网写存储、断网写离线队列，成功后角标加一
//!    - 展示：交给 `NotificationPresenter`，失败只记日志
//!
//! 入队完成时网络可能已经恢复，而恢复时触发的同步已经读过快照，
//! 所以入队后会重新读取可达性，已联网则再请求一次同步。
//!
//! 已知限制：同一 message_id 的第二次投递如果在第一次仍在写入时到达，
//! 会被当作重复丢弃；若第一次随后写入失败，这条推送要等推送服务重新投递。

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::badge::BadgeCounter;
use crate::connectivity::ReachabilityState;
use crate::error::{IngestError, StorageResult};
use crate::notification::{
    DeliveryDeduplicator, Notification, NotificationStore, OfflineQueue, RawPayload, RejectReason,
};
use crate::platform::NotificationPresenter;
use crate::sync::QueueDrainer;

/// 推送到达时应用所处的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryContext {
    Foreground,
    /// 后台或进程已被杀死
    Background,
}

impl DeliveryContext {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryContext::Foreground => "foreground",
            DeliveryContext::Background => "background",
        }
    }
}

/// 摄取结果
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// 已写入通知存储
    Stored(Notification),
    /// 断网，已写入离线队列
    Queued(Notification),
    /// 载荷不构成通知，已丢弃
    Dropped(RejectReason),
    /// 窗口内重复投递
    Duplicate { message_id: String },
}

impl IngestOutcome {
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            IngestOutcome::Stored(n) | IngestOutcome::Queued(n) => Some(n),
            _ => None,
        }
    }
}

pub struct IngestionPipeline {
    store: Arc<NotificationStore>,
    queue: Arc<OfflineQueue>,
    badge: Arc<BadgeCounter>,
    reachability: Arc<dyn ReachabilityState>,
    presenter: Arc<dyn NotificationPresenter>,
    dedup: DeliveryDeduplicator,
    drainer: Option<Arc<QueueDrainer>>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<NotificationStore>,
        queue: Arc<OfflineQueue>,
        badge: Arc<BadgeCounter>,
        reachability: Arc<dyn ReachabilityState>,
        presenter: Arc<dyn NotificationPresenter>,
    ) -> Self {
        Self {
            store,
            queue,
            badge,
            reachability,
            presenter,
            dedup: DeliveryDeduplicator::new(),
            drainer: None,
        }
    }

    pub fn with_deduplicator(mut self, dedup: DeliveryDeduplicator) -> Self {
        self.dedup = dedup;
        self
    }

    /// 断网入队后发现网络已恢复时使用的同步器
    pub fn with_drainer(mut self, drainer: Arc<QueueDrainer>) -> Self {
        self.drainer = Some(drainer);
        self
    }

    /// 摄取一条推送
    ///
    /// 只有数据路径（存储/队列）写入失败时返回错误；展示失败和角标失败只记录日志。
    pub async fn ingest(
        &self,
        payload: &RawPayload,
        context: DeliveryContext,
    ) -> Result<IngestOutcome, IngestError> {
        let notification = match Notification::from_payload(payload) {
            Ok(n) => n,
            Err(reason) => {
                debug!(context = context.as_str(), reason = %reason, "Dropping push payload");
                return Ok(IngestOutcome::Dropped(reason));
            }
        };

        if let Some(message_id) = &notification.message_id {
            if !self.dedup.first_delivery(message_id) {
                return Ok(IngestOutcome::Duplicate {
                    message_id: message_id.clone(),
                });
            }
        }

        let reachable = self.reachability.is_reachable();
        let (persisted, _) = tokio::join!(
            self.persist(&notification, reachable),
            self.present(&notification)
        );

        if let Err(source) = persisted {
            if let Some(message_id) = &notification.message_id {
                self.dedup.forget(message_id);
            }
            warn!(id = %notification.id, error = %source, "Failed to persist notification");
            return Err(IngestError::Persistence {
                id: notification.id,
                source,
            });
        }

        info!(
            id = %notification.id,
            context = context.as_str(),
            queued = !reachable,
            "Notification ingested"
        );

        Ok(if reachable {
            IngestOutcome::Stored(notification)
        } else {
            IngestOutcome::Queued(notification)
        })
    }

    /// 数据路径：写存储或队列，成功后角标加一
    async fn persist(&self, notification: &Notification, reachable: bool) -> StorageResult<()> {
        if reachable {
            self.store.insert(notification.clone()).await?;
        } else {
            self.queue.enqueue(notification.clone()).await?;
        }

        // 角标表示"已收到"，离线入队同样计数
        if let Err(e) = self.badge.increment().await {
            warn!(id = %notification.id, error = %e, "Failed to increment badge");
        }

        if !reachable && self.reachability.is_reachable() {
            self.drain_after_reconnect(&notification.id).await;
        }
        Ok(())
    }

    async fn drain_after_reconnect(&self, id: &str) {
        let Some(drainer) = &self.drainer else {
            return;
        };
        debug!(id = %id, "Connectivity restored while queueing, requesting drain");
        if let Err(e) = drainer.drain().await {
            warn!(id = %id, error = %e, "Drain after reconnect failed");
        }
    }

    async fn present(&self, notification: &Notification) {
        if let Err(e) = self.presenter.display(notification).await {
            warn!(id = %notification.id, error = %e, "Failed to display notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::DEFAULT_CAPACITY;
    use crate::error::StorageError;
    use crate::platform::headless::LogPresenter;
    use crate::storage::{KeyValueStore, MemoryKvStore, NOTIFICATIONS_KEY};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FixedReachability(AtomicBool);

    impl ReachabilityState for FixedReachability {
        fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// 第一次查询断网，之后一直联网（模拟入队期间恢复网络）
    struct ReconnectingReachability(AtomicUsize);

    impl ReachabilityState for ReconnectingReachability {
        fn is_reachable(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst) > 0
        }
    }

    /// 通知存储写入可按需失败
    struct FlakyKv {
        inner: MemoryKvStore,
        fail_store_writes: AtomicBool,
    }

    #[async_trait]
    impl KeyValueStore for FlakyKv {
        async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
            if key == NOTIFICATIONS_KEY && self.fail_store_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("store unavailable".to_string()));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> StorageResult<()> {
            self.inner.remove(key).await
        }
    }

    struct Fixture {
        store: Arc<NotificationStore>,
        queue: Arc<OfflineQueue>,
        badge: Arc<BadgeCounter>,
        presenter: Arc<LogPresenter>,
        pipeline: IngestionPipeline,
    }

    fn create_fixture(reachable: bool) -> Fixture {
        let kv = Arc::new(MemoryKvStore::new());
        let store = Arc::new(NotificationStore::new(kv.clone(), DEFAULT_CAPACITY));
        let queue = Arc::new(OfflineQueue::new(kv.clone()));
        let badge = Arc::new(BadgeCounter::new(kv));
        let presenter = Arc::new(LogPresenter::new());
        let pipeline = IngestionPipeline::new(
            store.clone(),
            queue.clone(),
            badge.clone(),
            Arc::new(FixedReachability(AtomicBool::new(reachable))),
            presenter.clone(),
        );
        Fixture {
            store,
            queue,
            badge,
            presenter,
            pipeline,
        }
    }

    #[tokio::test]
    async fn test_online_ingest_stores_counts_and_displays() {
        let f = create_fixture(true);
        let outcome = f
            .pipeline
            .ingest(&RawPayload::alert("Hi", "There"), DeliveryContext::Foreground)
            .await
            .unwrap();

        let n = outcome.notification().unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));
        assert_eq!(f.store.list().await.unwrap()[0].id, n.id);
        assert!(f.queue.is_empty().await.unwrap());
        assert_eq!(f.badge.get().await.unwrap(), 1);
        assert_eq!(f.presenter.displayed().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_ingest_queues_but_still_counts_and_displays() {
        let f = create_fixture(false);
        let outcome = f
            .pipeline
            .ingest(&RawPayload::alert("Hi", "There"), DeliveryContext::Background)
            .await
            .unwrap();

        assert!(matches!(outcome, IngestOutcome::Queued(_)));
        assert_eq!(f.store.len().await.unwrap(), 0);
        assert_eq!(f.queue.len().await.unwrap(), 1);
        assert_eq!(f.badge.get().await.unwrap(), 1);
        assert_eq!(f.presenter.displayed().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_noop() {
        let f = create_fixture(true);
        let outcome = f
            .pipeline
            .ingest(&RawPayload::data_only().with_data("type", "sync"), DeliveryContext::Foreground)
            .await
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Dropped(RejectReason::DataOnly));
        assert_eq!(f.store.len().await.unwrap(), 0);
        assert_eq!(f.badge.get().await.unwrap(), 0);
        assert!(f.presenter.displayed().is_empty());
    }

    #[tokio::test]
    async fn test_presentation_failure_does_not_block_store() {
        let f = create_fixture(true);
        f.presenter.fail_display(true);

        let outcome = f
            .pipeline
            .ingest(&RawPayload::alert("Hi", "There"), DeliveryContext::Foreground)
            .await
            .unwrap();

        assert!(matches!(outcome, IngestOutcome::Stored(_)));
        assert_eq!(f.store.len().await.unwrap(), 1);
        assert_eq!(f.badge.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_message_id_ingested_once() {
        let f = create_fixture(true);
        let payload = RawPayload::alert("Hi", "There").with_message_id("m-1");

        f.pipeline.ingest(&payload, DeliveryContext::Foreground).await.unwrap();
        let second = f.pipeline.ingest(&payload, DeliveryContext::Background).await.unwrap();

        assert_eq!(
            second,
            IngestOutcome::Duplicate {
                message_id: "m-1".to_string()
            }
        );
        assert_eq!(f.store.len().await.unwrap(), 1);
        assert_eq!(f.badge.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_identical_payloads_without_message_id_are_distinct() {
        let f = create_fixture(true);
        let payload = RawPayload::alert("Hi", "There");

        let a = f.pipeline.ingest(&payload, DeliveryContext::Foreground).await.unwrap();
        let b = f.pipeline.ingest(&payload, DeliveryContext::Foreground).await.unwrap();

        assert_ne!(a.notification().unwrap().id, b.notification().unwrap().id);
        assert_eq!(f.store.len().await.unwrap(), 2);
        assert_eq!(f.badge.get().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_queued_item_drained_when_connectivity_returns_during_enqueue() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let store = Arc::new(NotificationStore::new(kv.clone(), DEFAULT_CAPACITY));
        let queue = Arc::new(OfflineQueue::new(kv.clone()));
        let badge = Arc::new(BadgeCounter::new(kv.clone()));
        let drainer = Arc::new(QueueDrainer::new(store.clone(), queue.clone(), kv));
        let pipeline = IngestionPipeline::new(
            store.clone(),
            queue.clone(),
            badge.clone(),
            Arc::new(ReconnectingReachability(AtomicUsize::new(0))),
            Arc::new(LogPresenter::new()),
        )
        .with_drainer(drainer);

        let outcome = pipeline
            .ingest(&RawPayload::alert("Hi", "There"), DeliveryContext::Background)
            .await
            .unwrap();

        assert!(matches!(outcome, IngestOutcome::Queued(_)));
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(queue.is_empty().await.unwrap());
        assert_eq!(badge.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_allows_redelivery_of_same_message() {
        let kv = Arc::new(FlakyKv {
            inner: MemoryKvStore::new(),
            fail_store_writes: AtomicBool::new(true),
        });
        let store = Arc::new(NotificationStore::new(kv.clone(), DEFAULT_CAPACITY));
        let queue = Arc::new(OfflineQueue::new(kv.clone()));
        let badge = Arc::new(BadgeCounter::new(kv.clone()));
        let pipeline = IngestionPipeline::new(
            store.clone(),
            queue,
            badge.clone(),
            Arc::new(FixedReachability(AtomicBool::new(true))),
            Arc::new(LogPresenter::new()),
        );
        let payload = RawPayload::alert("Hi", "There").with_message_id("m-9");

        let err = pipeline.ingest(&payload, DeliveryContext::Foreground).await.unwrap_err();
        assert!(matches!(err, IngestError::Persistence { .. }));
        assert_eq!(badge.get().await.unwrap(), 0);

        kv.fail_store_writes.store(false, Ordering::SeqCst);
        let outcome = pipeline.ingest(&payload, DeliveryContext::Background).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(badge.get().await.unwrap(), 1);
    }
}

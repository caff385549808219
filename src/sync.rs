//! 离线队列同步 - 把离线期间暂存的通知逐条迁入通知存储
//!
//! ## 同步协议
//! 1. 读取队列快照
//! 2. 按快照顺序逐条：先插入存储，再按 ID 从队列删除（绝不先删后插）
//! 3. 任一持久化错误中止本次同步，已迁移的条目保持已删除状态
//! 4. 无论成功与否都记录最后同步时间
//!
//! 同一时间只允许一个同步在运行。重叠的请求不会丢失：它标记 `rerun_requested`
//! 后立即返回 `AlreadyRunning`，正在运行的同步看到标记后重新读取快照，
//! 直到没有新的请求为止。
//! 中途崩溃时未删除的条目会在下次同步时重新插入，存储按 ID 幂等，不会重复。

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::connectivity::ReachabilityListener;
use crate::error::{DrainError, StorageResult};
use crate::notification::{NotificationStore, OfflineQueue};
use crate::storage::{read_string, KeyValueStore, LAST_SYNC_KEY};

/// 一次同步请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// 执行完毕，迁移了 `drained` 条
    Completed { drained: usize },
    /// 已有同步在运行，本次请求已并入该次同步
    AlreadyRunning,
}

impl DrainOutcome {
    pub fn drained(&self) -> usize {
        match self {
            DrainOutcome::Completed { drained } => *drained,
            DrainOutcome::AlreadyRunning => 0,
        }
    }
}

/// 运行标记，离开作用域时自动清除
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct QueueDrainer {
    store: Arc<NotificationStore>,
    queue: Arc<OfflineQueue>,
    kv: Arc<dyn KeyValueStore>,
    in_progress: AtomicBool,
    /// 有请求在运行期间到达，需要再读一次快照
    rerun_requested: AtomicBool,
    last_outcome: Mutex<Option<DrainOutcome>>,
}

impl QueueDrainer {
    pub fn new(
        store: Arc<NotificationStore>,
        queue: Arc<OfflineQueue>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            store,
            queue,
            kv,
            in_progress: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            last_outcome: Mutex::new(None),
        }
    }

    /// 同步离线队列到通知存储
    ///
    /// 已有同步在运行时返回 `AlreadyRunning`，本次请求由运行中的同步负责完成。
    pub async fn drain(&self) -> Result<DrainOutcome, DrainError> {
        // 先登记请求再抢占运行标记，运行方释放标记后总能看到这次登记
        self.rerun_requested.store(true, Ordering::SeqCst);

        let mut drained = 0;
        let mut ran = false;
        let result = loop {
            if self
                .in_progress
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                if ran {
                    // 新请求已经由另一个调用方接手
                    break Ok(drained);
                }
                debug!("Drain already in progress, request handed to running drain");
                return Ok(DrainOutcome::AlreadyRunning);
            }
            ran = true;

            let pass = {
                let _guard = DrainGuard(&self.in_progress);
                self.drain_until_settled().await
            };
            match pass {
                Ok(n) => drained += n,
                Err(DrainError::Persistence { drained: n, source }) => {
                    // 持久化失败时放弃剩余请求，等下次触发重试
                    self.rerun_requested.store(false, Ordering::SeqCst);
                    break Err(DrainError::Persistence {
                        drained: drained + n,
                        source,
                    });
                }
            }

            // 释放标记与本次检查之间到达的请求
            if !self.rerun_requested.load(Ordering::SeqCst) {
                break Ok(drained);
            }
        };

        self.record_last_sync().await;

        match &result {
            Ok(0) => debug!("Offline queue empty, nothing to drain"),
            Ok(drained) => info!(drained, "Offline queue drained"),
            Err(e) => warn!(drained = e.drained(), error = %e, "Offline queue drain aborted"),
        }

        let outcome = result.map(|drained| DrainOutcome::Completed { drained });
        if let Ok(outcome) = &outcome {
            if let Ok(mut last) = self.last_outcome.lock() {
                *last = Some(*outcome);
            }
        }
        outcome
    }

    /// 反复读取快照，直到运行期间没有新的同步请求
    async fn drain_until_settled(&self) -> Result<usize, DrainError> {
        let mut drained = 0;
        while self.rerun_requested.swap(false, Ordering::SeqCst) {
            match self.drain_snapshot().await {
                Ok(n) => drained += n,
                Err(DrainError::Persistence { drained: n, source }) => {
                    return Err(DrainError::Persistence {
                        drained: drained + n,
                        source,
                    })
                }
            }
        }
        Ok(drained)
    }

    async fn drain_snapshot(&self) -> Result<usize, DrainError> {
        let snapshot = self
            .queue
            .snapshot()
            .await
            .map_err(|source| DrainError::Persistence { drained: 0, source })?;

        let mut drained = 0;
        for notification in snapshot {
            let id = notification.id.clone();

            let inserted = self
                .store
                .insert(notification)
                .await
                .map_err(|source| DrainError::Persistence { drained, source })?;
            self.queue
                .remove(&id)
                .await
                .map_err(|source| DrainError::Persistence { drained, source })?;

            debug!(id = %id, inserted, "Moved queued notification into store");
            drained += 1;
        }
        Ok(drained)
    }

    async fn record_last_sync(&self) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if let Err(e) = self.kv.set(LAST_SYNC_KEY, now.into_bytes()).await {
            warn!(error = %e, "Failed to record last sync time");
        }
    }

    /// 最后一次同步时间
    pub async fn last_sync(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let Some(raw) = read_string(self.kv.as_ref(), LAST_SYNC_KEY).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
            Err(_) => {
                warn!(value = %raw, "Unparsable last sync time");
                Ok(None)
            }
        }
    }

    /// 最近一次完成的同步结果
    pub fn last_outcome(&self) -> Option<DrainOutcome> {
        self.last_outcome.lock().ok().and_then(|last| *last)
    }

    pub fn is_draining(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReachabilityListener for QueueDrainer {
    async fn on_reachable(&self) {
        // 错误已在 drain 内记录，下次触发时重试
        let _ = self.drain().await;
    }
}

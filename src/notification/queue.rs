//! 离线队列 - 断网期间收到的通知暂存于此，恢复网络后由 `QueueDrainer` 迁入存储
//!
//! 删除总是按 ID 重新读取后过滤，绝不整体清空，
//! 因此同步过程中新入队的条目不会丢失。

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::model::Notification;
use crate::error::StorageResult;
use crate::storage::{read_json, write_json, KeyValueStore, OFFLINE_QUEUE_KEY};

pub struct OfflineQueue {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> StorageResult<Vec<Notification>> {
        Ok(read_json(self.kv.as_ref(), OFFLINE_QUEUE_KEY)
            .await?
            .unwrap_or_default())
    }

    /// 追加到队列末尾（同 ID 已在队列中时忽略）
    pub async fn enqueue(&self, notification: Notification) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;

        if items.iter().any(|n| n.id == notification.id) {
            return Ok(());
        }

        debug!(id = %notification.id, queued = items.len() + 1, "Queued notification while offline");
        items.push(notification);
        write_json(self.kv.as_ref(), OFFLINE_QUEUE_KEY, &items).await
    }

    /// 当前队列快照（入队顺序）
    pub async fn snapshot(&self) -> StorageResult<Vec<Notification>> {
        self.load().await
    }

    /// 按 ID 删除单个条目，返回是否确实删除
    pub async fn remove(&self, id: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;

        let before = items.len();
        items.retain(|n| n.id != id);
        if items.len() == before {
            return Ok(false);
        }

        write_json(self.kv.as_ref(), OFFLINE_QUEUE_KEY, &items).await?;
        Ok(true)
    }

    pub async fn len(&self) -> StorageResult<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }
}

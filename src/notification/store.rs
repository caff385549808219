//! 通知存储 - 持久化的有序通知列表（最新在前，容量上限）
//!
//! 整个列表以一个 JSON 数组存放在 `push_inbox.notifications` 下。
//! 所有读-改-写都在同一把锁内完成，插入按 ID 幂等。

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::model::Notification;
use crate::error::StorageResult;
use crate::storage::{read_json, write_json, KeyValueStore, NOTIFICATIONS_KEY};

/// 默认容量
pub const DEFAULT_CAPACITY: usize = 100;

/// 通知存储
pub struct NotificationStore {
    kv: Arc<dyn KeyValueStore>,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl NotificationStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        Self {
            kv,
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn load(&self) -> StorageResult<Vec<Notification>> {
        Ok(read_json(self.kv.as_ref(), NOTIFICATIONS_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save(&self, items: &[Notification]) -> StorageResult<()> {
        write_json(self.kv.as_ref(), NOTIFICATIONS_KEY, items).await
    }

    /// 插入到列表最前面，超出容量时淘汰最旧的条目
    ///
    /// ID 已存在时不做任何修改，返回 `false`
    pub async fn insert(&self, notification: Notification) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;

        if items.iter().any(|n| n.id == notification.id) {
            debug!(id = %notification.id, "Notification already stored, skipping insert");
            return Ok(false);
        }

        items.insert(0, notification);
        if items.len() > self.capacity {
            let evicted = items.len() - self.capacity;
            items.truncate(self.capacity);
            debug!(evicted, capacity = self.capacity, "Evicted oldest notifications");
        }

        self.save(&items).await?;
        Ok(true)
    }

    /// 标记已读；ID 不存在（可能已被淘汰）时什么都不做
    ///
    /// 返回是否有状态变化
    pub async fn mark_read(&self, id: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;

        let changed = match items.iter_mut().find(|n| n.id == id) {
            Some(n) => n.mark_read(),
            None => {
                debug!(id = %id, "mark_read for unknown notification ignored");
                false
            }
        };

        if changed {
            self.save(&items).await?;
        }
        Ok(changed)
    }

    /// 全部标记已读，返回本次被标记的数量
    pub async fn mark_all_read(&self) -> StorageResult<usize> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;

        let mut changed = 0;
        for n in items.iter_mut() {
            if n.mark_read() {
                changed += 1;
            }
        }
        if changed > 0 {
            self.save(&items).await?;
        }
        Ok(changed)
    }

    /// 最新在前的通知列表
    pub async fn list(&self) -> StorageResult<Vec<Notification>> {
        self.load().await
    }

    pub async fn get(&self, id: &str) -> StorageResult<Option<Notification>> {
        Ok(self.load().await?.into_iter().find(|n| n.id == id))
    }

    /// 按推送服务 message_id 查找（系统直接展示的推送被点击时使用）
    pub async fn find_by_message_id(&self, message_id: &str) -> StorageResult<Option<Notification>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|n| n.message_id.as_deref() == Some(message_id)))
    }

    pub async fn unread_count(&self) -> StorageResult<usize> {
        Ok(self.load().await?.iter().filter(|n| !n.is_read()).count())
    }

    pub async fn len(&self) -> StorageResult<usize> {
        Ok(self.load().await?.len())
    }
}

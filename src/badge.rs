//! 角标计数 - 独立持久化的未读角标账本
//!
//! 不从通知列表推导：每成功摄取一条通知加一，可以被显式设置或清零，
//! 与存储中的未读数量允许出现偏差。
//!
//! 所有操作都在同一把 FIFO 锁内完成读-改-写，
//! 并发 increment 不会丢失，set/clear 按调用顺序覆盖此前发起的 increment。

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StorageResult;
use crate::storage::{read_string, KeyValueStore, BADGE_COUNT_KEY};

pub struct BadgeCounter {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl BadgeCounter {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> StorageResult<u64> {
        let Some(raw) = read_string(self.kv.as_ref(), BADGE_COUNT_KEY).await? else {
            return Ok(0);
        };

        match raw.trim().parse::<u64>() {
            Ok(count) => Ok(count),
            Err(_) => {
                warn!(value = %raw, "Unparsable badge count, treating as 0");
                Ok(0)
            }
        }
    }

    async fn write(&self, count: u64) -> StorageResult<()> {
        self.kv.set(BADGE_COUNT_KEY, count.to_string().into_bytes()).await
    }

    /// 加一，返回新值
    pub async fn increment(&self) -> StorageResult<u64> {
        let _guard = self.write_lock.lock().await;
        let count = self.read().await?.saturating_add(1);
        self.write(count).await?;
        debug!(count, "Badge incremented");
        Ok(count)
    }

    /// 与平台角标同步时使用
    pub async fn set(&self, count: u64) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write(count).await?;
        debug!(count, "Badge set");
        Ok(())
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.set(0).await
    }

    pub async fn get(&self) -> StorageResult<u64> {
        let _guard = self.write_lock.lock().await;
        self.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;

    #[tokio::test]
    async fn test_starts_at_zero() {
        let badge = BadgeCounter::new(Arc::new(MemoryKvStore::new()));
        assert_eq!(badge.get().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_set_clear() {
        let badge = BadgeCounter::new(Arc::new(MemoryKvStore::new()));
        assert_eq!(badge.increment().await.unwrap(), 1);
        assert_eq!(badge.increment().await.unwrap(), 2);

        badge.set(10).await.unwrap();
        assert_eq!(badge.increment().await.unwrap(), 11);

        badge.clear().await.unwrap();
        assert_eq!(badge.get().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persisted_as_numeric_string() {
        let kv = Arc::new(MemoryKvStore::new());
        let badge = BadgeCounter::new(kv.clone());
        badge.set(42).await.unwrap();

        assert_eq!(kv.get(BADGE_COUNT_KEY).await.unwrap(), Some(b"42".to_vec()));
    }

    #[tokio::test]
    async fn test_corrupt_value_recovers_as_zero() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(BADGE_COUNT_KEY, b"NaN".to_vec()).await.unwrap();

        let badge = BadgeCounter::new(kv);
        assert_eq!(badge.increment().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let badge = Arc::new(BadgeCounter::new(Arc::new(MemoryKvStore::new())));
        badge.set(5).await.unwrap();

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let badge = badge.clone();
                tokio::spawn(async move { badge.increment().await.unwrap() })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(badge.get().await.unwrap(), 55);
    }
}

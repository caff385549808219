//! 持久化键值存储抽象
//!
//! 通知列表、离线队列、角标计数和最后同步时间都存放在同一个键值存储中，
//! 键名固定，布局如下：
//!
//! | 键 | 内容 |
//! |---|---|
//! | `push_inbox.notifications` | JSON 数组，最新在前，受容量上限约束 |
//! | `push_inbox.offline_queue` | JSON 数组，离线期间收到的通知 |
//! | `push_inbox.badge_count` | 十进制数字字符串 |
//! | `push_inbox.last_sync` | ISO-8601 时间字符串 |
//! | `push_inbox.push_token` | 推送 token（对引擎不透明） |

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StorageError, StorageResult};

pub use file::FileKvStore;
pub use memory::MemoryKvStore;

pub const NOTIFICATIONS_KEY: &str = "push_inbox.notifications";
pub const OFFLINE_QUEUE_KEY: &str = "push_inbox.offline_queue";
pub const BADGE_COUNT_KEY: &str = "push_inbox.badge_count";
pub const LAST_SYNC_KEY: &str = "push_inbox.last_sync";
pub const PUSH_TOKEN_KEY: &str = "push_inbox.push_token";

/// 持久化键值存储（平台提供，测试中可替换）
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    async fn remove(&self, key: &str) -> StorageResult<()>;
}

/// 读取 JSON 值，键不存在时返回 `None`
pub async fn read_json<T: DeserializeOwned>(
    kv: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match kv.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::codec(key, e)),
        None => Ok(None),
    }
}

/// 写入 JSON 值
pub async fn write_json<T: Serialize + ?Sized>(
    kv: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| StorageError::codec(key, e))?;
    kv.set(key, bytes).await
}

/// 读取字符串值（非 UTF-8 内容按损坏处理）
pub async fn read_string(kv: &dyn KeyValueStore, key: &str) -> StorageResult<Option<String>> {
    match kv.get(key).await? {
        Some(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| StorageError::Backend(format!("{} is not valid UTF-8: {}", key, e))),
        None => Ok(None),
    }
}

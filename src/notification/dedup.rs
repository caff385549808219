//! 投递去重器 - 同一条推送可能同时经前台和后台回调到达
//!
//! ## 去重策略
//! 1. 只按推送服务的 message_id 去重，没有 message_id 的载荷一律放行
//! 2. 默认 120 秒时间窗口，窗口过期后同 ID 可以再次摄取
//! 3. 数据路径写入失败时调用 `forget`，让下一次投递可以重试
//!
//! 第一次投递仍在写入时到达的重复投递会被直接丢弃；如果第一次随后写入失败，
//! 这条推送只能等推送服务重新投递。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(120);

/// 投递去重器
pub struct DeliveryDeduplicator {
    /// 最近摄取的消息: message_id -> 首次出现时间
    recent: Mutex<HashMap<String, Instant>>,
    /// 去重窗口
    window: Duration,
}

impl DeliveryDeduplicator {
    /// 创建新的去重器，使用默认 120 秒窗口
    pub fn new() -> Self {
        Self {
            recent: Mutex::new(HashMap::new()),
            window: DEFAULT_DEDUP_WINDOW,
        }
    }

    /// 设置去重窗口时长
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 记录一次投递
    ///
    /// 返回 `true` 表示首次出现应继续摄取，`false` 表示窗口内重复
    pub fn first_delivery(&self, message_id: &str) -> bool {
        self.first_delivery_at(message_id, Instant::now())
    }

    /// 记录一次投递（带时间戳，用于测试）
    pub fn first_delivery_at(&self, message_id: &str, now: Instant) -> bool {
        let Ok(mut recent) = self.recent.lock() else {
            return true;
        };

        // 清理过期记录
        recent.retain(|_, seen| now.saturating_duration_since(*seen) < self.window);

        if let Some(seen) = recent.get(message_id) {
            debug!(
                message_id = %message_id,
                elapsed_ms = now.saturating_duration_since(*seen).as_millis() as u64,
                "Duplicate delivery within window"
            );
            return false;
        }

        recent.insert(message_id.to_string(), now);
        true
    }

    /// 撤销记录（摄取失败时调用）
    pub fn forget(&self, message_id: &str) {
        if let Ok(mut recent) = self.recent.lock() {
            recent.remove(message_id);
        }
    }

    pub fn tracked(&self) -> usize {
        self.recent.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for DeliveryDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

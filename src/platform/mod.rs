//! 平台协作方接口 - 推送 SDK、本地通知展示、网络探测、权限、导航
//!
//! 引擎只依赖这些 trait，真实实现由宿主应用提供。
//! 回调注册统一返回 `Subscription`，drop 或显式 `unsubscribe` 时注销，
//! 测试可以用 `headless` 模块里的实现直接模拟事件投递。

pub mod headless;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::channel::ChannelSpec;
use crate::error::PlatformResult;
use crate::notification::{Notification, RawPayload};
use crate::permission::PermissionState;

/// 收到推送消息的回调
pub type MessageHandler = Arc<dyn Fn(RawPayload) + Send + Sync>;
/// token 刷新回调
pub type TokenHandler = Arc<dyn Fn(String) + Send + Sync>;
/// 用户点击通知的回调
pub type OpenedHandler = Arc<dyn Fn(OpenedEvent) + Send + Sync>;
/// 网络可达性变化回调
pub type ReachabilityHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// 用户点击通知事件
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenedEvent {
    /// 本地展示时携带的通知 ID
    #[serde(default)]
    pub notification_id: Option<String>,
    /// 系统直接展示的推送只带有推送服务的 message_id
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, String>,
}

/// 交给导航层的深链目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepLink {
    /// 路由类型（通知 data 中的 `type`）
    pub kind: String,
    pub notification_id: String,
    pub params: HashMap<String, String>,
}

/// 推送服务 SDK
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn get_token(&self) -> PlatformResult<String>;

    fn on_token_refresh(&self, handler: TokenHandler) -> Subscription;

    fn on_foreground_message(&self, handler: MessageHandler) -> Subscription;

    /// 后台/被杀进程时的消息，两次调用之间进程可能被挂起
    fn on_background_message(&self, handler: MessageHandler) -> Subscription;

    fn on_notification_opened(&self, handler: OpenedHandler) -> Subscription;
}

/// 本地通知展示
#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    /// 创建通知渠道（平台侧幂等），返回渠道 ID
    async fn create_channel(&self, spec: &ChannelSpec) -> PlatformResult<String>;

    async fn display(&self, notification: &Notification) -> PlatformResult<()>;

    async fn set_badge_count(&self, count: u64) -> PlatformResult<()>;
}

/// 网络可达性探测
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_currently_reachable(&self) -> bool;

    fn subscribe(&self, handler: ReachabilityHandler) -> Subscription;
}

/// 通知权限
#[async_trait]
pub trait PermissionPlatform: Send + Sync {
    /// 读取当前状态，不弹窗
    async fn check(&self) -> PlatformResult<PermissionState>;

    /// 向用户请求授权（可能弹窗）
    async fn request(&self) -> PlatformResult<PermissionState>;
}

/// 导航层（界面渲染不在引擎范围内）
pub trait Navigator: Send + Sync {
    fn open(&self, link: DeepLink);

    /// 通知列表或已读状态变化，界面需要刷新
    fn notifications_changed(&self) {}
}

/// 回调注册句柄，drop 时自动注销
#[must_use = "dropping a Subscription unregisters the handler"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// 无需注销的句柄
    pub fn noop() -> Self {
        Self { unsubscribe: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

struct HandlerSetInner<H> {
    next_id: u64,
    handlers: Vec<(u64, H)>,
}

/// 回调集合，`add` 返回的 `Subscription` 负责移除对应回调
pub struct HandlerSet<H> {
    inner: Arc<Mutex<HandlerSetInner<H>>>,
}

impl<H: Clone + Send + 'static> HandlerSet<H> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HandlerSetInner {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    pub fn add(&self, handler: H) -> Subscription {
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                inner.next_id += 1;
                let id = inner.next_id;
                inner.handlers.push((id, handler));
                id
            }
            Err(_) => return Subscription::noop(),
        };

        let weak: Weak<Mutex<HandlerSetInner<H>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut inner) = inner.lock() {
                    inner.handlers.retain(|(i, _)| *i != id);
                }
            }
        })
    }

    /// 当前回调的快照（调用回调时不持有锁）
    pub fn snapshot(&self) -> Vec<H> {
        self.inner
            .lock()
            .map(|inner| inner.handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.handlers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<H: Clone + Send + 'static> Default for HandlerSet<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscription_drop_unregisters() {
        let set: HandlerSet<ReachabilityHandler> = HandlerSet::new();
        let sub = set.add(Arc::new(|_: bool| {}));
        let _other = set.add(Arc::new(|_: bool| {}));
        assert_eq!(set.len(), 2);

        drop(sub);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_explicit_unsubscribe_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_set_is_harmless() {
        let set: HandlerSet<TokenHandler> = HandlerSet::new();
        let sub = set.add(Arc::new(|_: String| {}));
        drop(set);
        sub.unsubscribe();
    }
}

//! 无界面平台实现 - 命令行工具和测试使用
//!
//! 这些实现不接触真实推送 SDK：展示只写日志，网络状态和权限由调用方设定，
//! 推送事件通过 `ManualPushProvider::deliver_*` 手动投递。

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::info;

use super::{
    ConnectivityProbe, DeepLink, HandlerSet, MessageHandler, Navigator, NotificationPresenter,
    OpenedEvent, OpenedHandler, PermissionPlatform, PushProvider, ReachabilityHandler,
    Subscription, TokenHandler,
};
use crate::channel::ChannelSpec;
use crate::error::{PlatformError, PlatformResult};
use crate::notification::{Notification, RawPayload};
use crate::permission::PermissionState;

/// 固定/手动切换的网络状态
pub struct StaticProbe {
    reachable: AtomicBool,
    handlers: HandlerSet<ReachabilityHandler>,
}

impl StaticProbe {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            handlers: HandlerSet::new(),
        }
    }

    /// 设定网络状态并通知订阅者（与平台一样，状态未变也会发事件）
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        for handler in self.handlers.snapshot() {
            handler(reachable);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_currently_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn subscribe(&self, handler: ReachabilityHandler) -> Subscription {
        self.handlers.add(handler)
    }
}

/// 只写日志的通知展示
#[derive(Default)]
pub struct LogPresenter {
    displayed: Mutex<Vec<Notification>>,
    channels_created: AtomicUsize,
    badge: Mutex<Option<u64>>,
    fail_display: AtomicBool,
    fail_channel: AtomicBool,
}

impl LogPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续 display 调用失败
    pub fn fail_display(&self, fail: bool) {
        self.fail_display.store(fail, Ordering::SeqCst);
    }

    /// 让后续 create_channel 调用失败
    pub fn fail_channel_creation(&self, fail: bool) {
        self.fail_channel.store(fail, Ordering::SeqCst);
    }

    pub fn displayed(&self) -> Vec<Notification> {
        self.displayed.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn channels_created(&self) -> usize {
        self.channels_created.load(Ordering::SeqCst)
    }

    /// 最后一次设置到平台的角标
    pub fn badge(&self) -> Option<u64> {
        self.badge.lock().ok().and_then(|b| *b)
    }
}

#[async_trait]
impl NotificationPresenter for LogPresenter {
    async fn create_channel(&self, spec: &ChannelSpec) -> PlatformResult<String> {
        if self.fail_channel.load(Ordering::SeqCst) {
            return Err(PlatformError::Failed("channel creation rejected".to_string()));
        }
        self.channels_created.fetch_add(1, Ordering::SeqCst);
        Ok(spec.id.clone())
    }

    async fn display(&self, notification: &Notification) -> PlatformResult<()> {
        if self.fail_display.load(Ordering::SeqCst) {
            return Err(PlatformError::Failed("display rejected".to_string()));
        }
        info!(id = %notification.id, title = %notification.title, "Displaying notification");
        if let Ok(mut displayed) = self.displayed.lock() {
            displayed.push(notification.clone());
        }
        Ok(())
    }

    async fn set_badge_count(&self, count: u64) -> PlatformResult<()> {
        if let Ok(mut badge) = self.badge.lock() {
            *badge = Some(count);
        }
        Ok(())
    }
}

/// 预设权限结果
pub struct StaticPermission {
    current: Mutex<PermissionState>,
    answer: PermissionState,
    prompts: AtomicUsize,
}

impl StaticPermission {
    /// `current` 为初始状态，`answer` 为用户对弹窗的选择
    pub fn new(current: PermissionState, answer: PermissionState) -> Self {
        Self {
            current: Mutex::new(current),
            answer,
            prompts: AtomicUsize::new(0),
        }
    }

    /// 已授权的平台
    pub fn granted() -> Self {
        Self::new(PermissionState::Authorized, PermissionState::Authorized)
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionPlatform for StaticPermission {
    async fn check(&self) -> PlatformResult<PermissionState> {
        self.current
            .lock()
            .map(|c| *c)
            .map_err(|_| PlatformError::Failed("permission state poisoned".to_string()))
    }

    async fn request(&self) -> PlatformResult<PermissionState> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        let mut current = self
            .current
            .lock()
            .map_err(|_| PlatformError::Failed("permission state poisoned".to_string()))?;
        *current = self.answer;
        Ok(self.answer)
    }
}

/// 手动投递事件的推送服务
#[derive(Default)]
pub struct ManualPushProvider {
    token: Mutex<Option<String>>,
    token_handlers: HandlerSet<TokenHandler>,
    foreground_handlers: HandlerSet<MessageHandler>,
    background_handlers: HandlerSet<MessageHandler>,
    opened_handlers: HandlerSet<OpenedHandler>,
}

impl ManualPushProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let provider = Self::new();
        if let Ok(mut t) = provider.token.lock() {
            *t = Some(token.into());
        }
        provider
    }

    pub fn deliver_foreground(&self, payload: RawPayload) {
        for handler in self.foreground_handlers.snapshot() {
            handler(payload.clone());
        }
    }

    pub fn deliver_background(&self, payload: RawPayload) {
        for handler in self.background_handlers.snapshot() {
            handler(payload.clone());
        }
    }

    pub fn open(&self, event: OpenedEvent) {
        for handler in self.opened_handlers.snapshot() {
            handler(event.clone());
        }
    }

    pub fn refresh_token(&self, token: impl Into<String>) {
        let token = token.into();
        if let Ok(mut t) = self.token.lock() {
            *t = Some(token.clone());
        }
        for handler in self.token_handlers.snapshot() {
            handler(token.clone());
        }
    }

    /// 已注册的回调总数
    pub fn handler_count(&self) -> usize {
        self.token_handlers.len()
            + self.foreground_handlers.len()
            + self.background_handlers.len()
            + self.opened_handlers.len()
    }
}

#[async_trait]
impl PushProvider for ManualPushProvider {
    async fn get_token(&self) -> PlatformResult<String> {
        self.token
            .lock()
            .ok()
            .and_then(|t| t.clone())
            .ok_or_else(|| PlatformError::Unavailable("no push token".to_string()))
    }

    fn on_token_refresh(&self, handler: TokenHandler) -> Subscription {
        self.token_handlers.add(handler)
    }

    fn on_foreground_message(&self, handler: MessageHandler) -> Subscription {
        self.foreground_handlers.add(handler)
    }

    fn on_background_message(&self, handler: MessageHandler) -> Subscription {
        self.background_handlers.add(handler)
    }

    fn on_notification_opened(&self, handler: OpenedHandler) -> Subscription {
        self.opened_handlers.add(handler)
    }
}

/// 记录导航请求的导航层
#[derive(Default)]
pub struct LogNavigator {
    opened: Mutex<Vec<DeepLink>>,
    refreshes: AtomicUsize,
}

impl LogNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<DeepLink> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

impl Navigator for LogNavigator {
    fn open(&self, link: DeepLink) {
        info!(kind = %link.kind, id = %link.notification_id, "Navigate to notification target");
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(link);
        }
    }

    fn notifications_changed(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

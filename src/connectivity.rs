//! 网络状态监听 - 维护最后已知的可达性，只在 断网→联网 的边沿触发同步
//!
//! `is_reachable` 读取缓存状态，从不发起网络探测，摄取路径可以同步调用。
//! 边沿检测用原子 swap 完成：多个并发的"已联网"事件只会触发一次监听器。

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::platform::{ConnectivityProbe, HandlerSet, Subscription};

/// 联网边沿监听器
#[async_trait]
pub trait ReachabilityListener: Send + Sync {
    async fn on_reachable(&self);
}

/// 摄取路径使用的可达性查询
pub trait ReachabilityState: Send + Sync {
    fn is_reachable(&self) -> bool;
}

pub struct ConnectivityWatcher {
    probe: Arc<dyn ConnectivityProbe>,
    reachable: AtomicBool,
    listeners: HandlerSet<Arc<dyn ReachabilityListener>>,
    subscription: Mutex<Option<Subscription>>,
    runtime: Mutex<Option<Handle>>,
}

impl ConnectivityWatcher {
    pub fn new(probe: Arc<dyn ConnectivityProbe>) -> Arc<Self> {
        Arc::new(Self {
            probe,
            reachable: AtomicBool::new(false),
            listeners: HandlerSet::new(),
            subscription: Mutex::new(None),
            runtime: Mutex::new(None),
        })
    }

    /// 注册联网监听器，每次边沿调用一次
    pub fn add_listener(&self, listener: Arc<dyn ReachabilityListener>) -> Subscription {
        self.listeners.add(listener)
    }

    /// 探测一次初始状态并订阅平台事件
    ///
    /// 初始状态为已联网时立即触发一次监听器（覆盖上次断网退出、本次联网启动的情况）。
    /// 返回初始可达性。
    pub async fn start(self: &Arc<Self>) -> bool {
        let reachable = self.observe().await;
        if reachable {
            self.notify_listeners().await;
        }
        reachable
    }

    /// 与 `start` 相同，但不触发初始监听器
    ///
    /// 调用方需要自己处理初始已联网的情况并拿到结果时使用。
    pub async fn observe(self: &Arc<Self>) -> bool {
        if let Ok(mut runtime) = self.runtime.lock() {
            *runtime = Handle::try_current().ok();
        }

        let reachable = self.probe.is_currently_reachable().await;
        self.reachable.store(reachable, Ordering::SeqCst);
        info!(reachable, "Connectivity watcher started");

        let weak = Arc::downgrade(self);
        let subscription = self.probe.subscribe(Arc::new(move |reachable: bool| {
            if let Some(watcher) = weak.upgrade() {
                watcher.handle_change(reachable);
            }
        }));
        if let Ok(mut slot) = self.subscription.lock() {
            // 重复 start 时旧订阅在这里被替换并注销
            *slot = Some(subscription);
        }
        reachable
    }

    /// 注销平台订阅
    pub fn stop(&self) {
        if let Ok(mut slot) = self.subscription.lock() {
            if let Some(subscription) = slot.take() {
                subscription.unsubscribe();
                debug!("Connectivity watcher stopped");
            }
        }
    }

    /// 最后已知的可达性（不阻塞）
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// 处理平台事件，返回是否发生了 断网→联网 边沿
    ///
    /// 监听器在运行时上异步执行，调用方不会被阻塞。
    pub fn handle_change(self: &Arc<Self>, reachable: bool) -> bool {
        let was = self.reachable.swap(reachable, Ordering::SeqCst);
        if !reachable || was {
            if was && !reachable {
                info!("Connectivity lost");
            }
            return false;
        }

        info!("Connectivity restored");
        let runtime = self
            .runtime
            .lock()
            .ok()
            .and_then(|r| r.clone())
            .or_else(|| Handle::try_current().ok());

        match runtime {
            Some(handle) => {
                let watcher = self.clone();
                handle.spawn(async move { watcher.notify_listeners().await });
            }
            None => warn!("No async runtime available, reachable transition not dispatched"),
        }
        true
    }

    /// 重新探测（应用回到前台时）；检测到边沿时等待监听器执行完毕
    pub async fn refresh(&self) -> bool {
        let reachable = self.probe.is_currently_reachable().await;
        let was = self.reachable.swap(reachable, Ordering::SeqCst);
        if reachable && !was {
            info!("Connectivity restored (detected on refresh)");
            self.notify_listeners().await;
        }
        reachable
    }

    async fn notify_listeners(&self) {
        for listener in self.listeners.snapshot() {
            listener.on_reachable().await;
        }
    }
}

impl ReachabilityState for ConnectivityWatcher {
    fn is_reachable(&self) -> bool {
        ConnectivityWatcher::is_reachable(self)
    }
}

impl Drop for ConnectivityWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::StaticProbe;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingListener {
        calls: AtomicUsize,
    }

    impl CountingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReachabilityListener for CountingListener {
        async fn on_reachable(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_start_offline_does_not_fire() {
        let probe = Arc::new(StaticProbe::new(false));
        let watcher = ConnectivityWatcher::new(probe.clone());
        let listener = CountingListener::new();
        let _sub = watcher.add_listener(listener.clone());

        assert!(!watcher.start().await);
        assert!(!watcher.is_reachable());
        assert_eq!(listener.calls(), 0);
    }

    #[tokio::test]
    async fn test_start_online_fires_initial() {
        let probe = Arc::new(StaticProbe::new(true));
        let watcher = ConnectivityWatcher::new(probe);
        let listener = CountingListener::new();
        let _sub = watcher.add_listener(listener.clone());

        assert!(watcher.start().await);
        assert_eq!(listener.calls(), 1);
    }

    #[tokio::test]
    async fn test_observe_online_does_not_fire_initial() {
        let probe = Arc::new(StaticProbe::new(true));
        let watcher = ConnectivityWatcher::new(probe.clone());
        let listener = CountingListener::new();
        let _sub = watcher.add_listener(listener.clone());

        assert!(watcher.observe().await);
        assert!(watcher.is_reachable());
        assert_eq!(probe.subscriber_count(), 1);
        assert_eq!(listener.calls(), 0);
    }

    #[tokio::test]
    async fn test_fires_only_on_false_to_true_edge() {
        let probe = Arc::new(StaticProbe::new(false));
        let watcher = ConnectivityWatcher::new(probe.clone());
        let listener = CountingListener::new();
        let _sub = watcher.add_listener(listener.clone());
        watcher.start().await;

        probe.set_reachable(false);
        probe.set_reachable(true);
        probe.set_reachable(true);
        probe.set_reachable(true);
        settle().await;
        assert_eq!(listener.calls(), 1);

        probe.set_reachable(false);
        probe.set_reachable(true);
        settle().await;
        assert_eq!(listener.calls(), 2);
    }

    #[tokio::test]
    async fn test_stop_unsubscribes_from_probe() {
        let probe = Arc::new(StaticProbe::new(false));
        let watcher = ConnectivityWatcher::new(probe.clone());
        watcher.start().await;
        assert_eq!(probe.subscriber_count(), 1);

        watcher.stop();
        assert_eq!(probe.subscriber_count(), 0);
        probe.set_reachable(true);
        assert!(!watcher.is_reachable());
    }

    #[tokio::test]
    async fn test_refresh_detects_edge() {
        let probe = Arc::new(StaticProbe::new(false));
        let watcher = ConnectivityWatcher::new(probe.clone());
        let listener = CountingListener::new();
        let _sub = watcher.add_listener(listener.clone());
        watcher.start().await;
        watcher.stop();

        probe.set_reachable(true);
        assert!(watcher.refresh().await);
        assert!(watcher.refresh().await);
        assert_eq!(listener.calls(), 1);
    }

    #[tokio::test]
    async fn test_removed_listener_not_called() {
        let probe = Arc::new(StaticProbe::new(false));
        let watcher = ConnectivityWatcher::new(probe.clone());
        let listener = CountingListener::new();
        let sub = watcher.add_listener(listener.clone());
        watcher.start().await;

        drop(sub);
        probe.set_reachable(true);
        settle().await;
        assert_eq!(listener.calls(), 0);
    }
}

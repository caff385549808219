//! 集成测试共用的引擎装配

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use push_inbox::platform::headless::{
    LogNavigator, LogPresenter, ManualPushProvider, StaticPermission, StaticProbe,
};
use push_inbox::{EngineBuilder, EngineConfig, KeyValueStore, LifecycleCoordinator, MemoryKvStore};

pub struct TestEngine {
    pub engine: Arc<LifecycleCoordinator>,
    pub kv: Arc<dyn KeyValueStore>,
    pub probe: Arc<StaticProbe>,
    pub presenter: Arc<LogPresenter>,
    pub permission: Arc<StaticPermission>,
    pub push: Arc<ManualPushProvider>,
    pub navigator: Arc<LogNavigator>,
}

pub fn create_test_engine(reachable: bool, permission: StaticPermission) -> TestEngine {
    create_test_engine_with(Arc::new(MemoryKvStore::new()), reachable, permission)
}

pub fn create_test_engine_with(
    kv: Arc<dyn KeyValueStore>,
    reachable: bool,
    permission: StaticPermission,
) -> TestEngine {
    let probe = Arc::new(StaticProbe::new(reachable));
    let presenter = Arc::new(LogPresenter::new());
    let permission = Arc::new(permission);
    let push = Arc::new(ManualPushProvider::with_token("tok-1"));
    let navigator = Arc::new(LogNavigator::new());

    let engine = EngineBuilder::new()
        .config(EngineConfig::default())
        .storage(kv.clone())
        .presenter(presenter.clone())
        .connectivity(probe.clone())
        .permission(permission.clone())
        .push_provider(push.clone())
        .navigator(navigator.clone())
        .build()
        .unwrap();

    TestEngine {
        engine,
        kv,
        probe,
        presenter,
        permission,
        push,
        navigator,
    }
}

/// 等待异步派发的回调执行完毕
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

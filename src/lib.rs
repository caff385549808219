//! Push Inbox - 设备端推送通知接收、持久化与同步引擎
//!
//! 负责接收推送（前台或后台）、本地持久化、断网暂存并在恢复网络后同步、
//! 维护未读角标，并向应用其余部分提供幂等的已读/投递状态。

pub mod badge;
pub mod builder;
pub mod channel;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod notification;
pub mod permission;
pub mod platform;
pub mod storage;
pub mod sync;

pub use badge::BadgeCounter;
pub use builder::EngineBuilder;
pub use channel::{ChannelRegistrar, ChannelSpec, Importance};
pub use config::EngineConfig;
pub use connectivity::{ConnectivityWatcher, ReachabilityListener, ReachabilityState};
pub use error::{DrainError, IngestError, PlatformError, StorageError};
pub use ingest::{DeliveryContext, IngestOutcome, IngestionPipeline};
pub use lifecycle::{LifecycleCoordinator, StartupReport};
pub use notification::{
    DeliveryDeduplicator, Notification, NotificationStore, OfflineQueue, RawAlert, RawPayload,
    RejectReason,
};
pub use permission::{PermissionGate, PermissionState};
pub use platform::{
    ConnectivityProbe, DeepLink, Navigator, NotificationPresenter, OpenedEvent,
    PermissionPlatform, PushProvider, Subscription,
};
pub use storage::{FileKvStore, KeyValueStore, MemoryKvStore};
pub use sync::{DrainOutcome, QueueDrainer};

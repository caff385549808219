//! 通知数据层 - 记录模型、持久化存储、离线队列、投递去重

pub mod dedup;
pub mod model;
pub mod queue;
pub mod store;

pub use dedup::DeliveryDeduplicator;
pub use model::{generate_id, Notification, RawAlert, RawPayload, RejectReason, DEFAULT_KIND};
pub use queue::OfflineQueue;
pub use store::{NotificationStore, DEFAULT_CAPACITY};

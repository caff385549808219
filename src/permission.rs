//! 通知权限状态机
//!
//! ```text
//! not_determined --request--> authorized | denied | provisional
//! ```
//!
//! `check` 只读不改；`request` 是唯一会改变状态的操作，
//! 已授权时直接返回，已拒绝时不再自动弹窗（交给平台策略）。

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::error::PlatformResult;
use crate::platform::PermissionPlatform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    NotDetermined,
    Denied,
    Authorized,
    Provisional,
}

impl PermissionState {
    /// 可以展示通知（含临时授权）
    pub fn is_granted(self) -> bool {
        matches!(self, PermissionState::Authorized | PermissionState::Provisional)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionState::NotDetermined => "not_determined",
            PermissionState::Denied => "denied",
            PermissionState::Authorized => "authorized",
            PermissionState::Provisional => "provisional",
        }
    }
}

impl std::fmt::Display for PermissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct PermissionGate {
    platform: Arc<dyn PermissionPlatform>,
    /// 串行化 request，避免并发请求重复弹窗
    request_lock: AsyncMutex<()>,
    /// 最近一次读到的状态（仅用于诊断，不作为缓存返回）
    last_known: Mutex<Option<PermissionState>>,
}

impl PermissionGate {
    pub fn new(platform: Arc<dyn PermissionPlatform>) -> Self {
        Self {
            platform,
            request_lock: AsyncMutex::new(()),
            last_known: Mutex::new(None),
        }
    }

    fn remember(&self, state: PermissionState) {
        if let Ok(mut last) = self.last_known.lock() {
            *last = Some(state);
        }
    }

    /// 从平台读取当前权限状态
    pub async fn check_permission(&self) -> PlatformResult<PermissionState> {
        let state = self.platform.check().await?;
        debug!(state = %state, "Checked notification permission");
        self.remember(state);
        Ok(state)
    }

    /// 请求权限（仅在 not_determined 时真正弹窗）
    pub async fn request_permission(&self) -> PlatformResult<PermissionState> {
        let _guard = self.request_lock.lock().await;

        let current = self.platform.check().await?;
        let state = match current {
            PermissionState::NotDetermined => {
                let granted = self.platform.request().await?;
                info!(state = %granted, "Notification permission requested");
                granted
            }
            settled => {
                debug!(state = %settled, "Permission already settled, not prompting");
                settled
            }
        };

        self.remember(state);
        Ok(state)
    }

    pub fn last_known(&self) -> Option<PermissionState> {
        self.last_known.lock().ok().and_then(|last| *last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::StaticPermission;

    #[tokio::test]
    async fn test_request_from_not_determined_prompts_once() {
        let platform = Arc::new(StaticPermission::new(
            PermissionState::NotDetermined,
            PermissionState::Authorized,
        ));
        let gate = PermissionGate::new(platform.clone());

        assert_eq!(gate.request_permission().await.unwrap(), PermissionState::Authorized);
        assert_eq!(gate.request_permission().await.unwrap(), PermissionState::Authorized);
        assert_eq!(platform.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_denied_is_not_reprompted() {
        let platform = Arc::new(StaticPermission::new(
            PermissionState::NotDetermined,
            PermissionState::Denied,
        ));
        let gate = PermissionGate::new(platform.clone());

        assert_eq!(gate.request_permission().await.unwrap(), PermissionState::Denied);
        assert_eq!(gate.check_permission().await.unwrap(), PermissionState::Denied);
        assert_eq!(gate.request_permission().await.unwrap(), PermissionState::Denied);
        assert_eq!(platform.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_check_never_prompts() {
        let platform = Arc::new(StaticPermission::new(
            PermissionState::NotDetermined,
            PermissionState::Authorized,
        ));
        let gate = PermissionGate::new(platform.clone());

        assert_eq!(gate.check_permission().await.unwrap(), PermissionState::NotDetermined);
        assert_eq!(platform.prompt_count(), 0);
        assert_eq!(gate.last_known(), Some(PermissionState::NotDetermined));
    }

    #[test]
    fn test_granted_states() {
        assert!(PermissionState::Authorized.is_granted());
        assert!(PermissionState::Provisional.is_granted());
        assert!(!PermissionState::Denied.is_granted());
        assert!(!PermissionState::NotDetermined.is_granted());
        assert_eq!(
            serde_json::to_string(&PermissionState::NotDetermined).unwrap(),
            "\"not_determined\""
        );
    }
}

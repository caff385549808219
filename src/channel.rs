//! 通知渠道注册 - 展示任何通知前确保渠道已存在
//!
//! 首次成功后不再调用平台；失败不会被记住，下次调用会重试。

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::NotificationPresenter;

/// 渠道重要程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Default,
    High,
}

/// 渠道定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    #[serde(default = "default_importance")]
    pub importance: Importance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_importance() -> Importance {
    Importance::High
}

impl Default for ChannelSpec {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "General".to_string(),
            importance: Importance::High,
            description: None,
        }
    }
}

pub struct ChannelRegistrar {
    presenter: Arc<dyn NotificationPresenter>,
    spec: ChannelSpec,
    registered: OnceCell<String>,
}

impl ChannelRegistrar {
    pub fn new(presenter: Arc<dyn NotificationPresenter>, spec: ChannelSpec) -> Self {
        Self {
            presenter,
            spec,
            registered: OnceCell::new(),
        }
    }

    /// 确保渠道存在，返回平台渠道 ID
    pub async fn ensure_channel(&self) -> PlatformResult<String> {
        self.registered
            .get_or_try_init(|| async {
                let channel_id = self.presenter.create_channel(&self.spec).await?;
                info!(channel = %channel_id, "Notification channel registered");
                Ok::<_, PlatformError>(channel_id)
            })
            .await
            .cloned()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.initialized()
    }

    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }
}

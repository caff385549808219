//! 通知数据模型 - 推送原始载荷、规范化后的通知记录
//!
//! 推送载荷形状不固定（很多推送只有 data 没有展示内容），
//! 在摄取边界通过 `Notification::from_payload` 显式校验，
//! 得到合法的 `Notification` 或者一个 `RejectReason`。

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 未携带 `type` 时的默认路由类型
pub const DEFAULT_KIND: &str = "general";

/// 推送服务投递的原始载荷
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPayload {
    /// 推送服务分配的消息 ID（同一条推送在前台/后台回调中相同）
    #[serde(default)]
    pub message_id: Option<String>,
    /// 展示内容块
    #[serde(default)]
    pub notification: Option<RawAlert>,
    /// 自定义数据，值可以是任意 JSON
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// 原始载荷中的展示内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAlert {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl RawPayload {
    /// 带展示内容的载荷
    pub fn alert(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: None,
            notification: Some(RawAlert {
                title: Some(title.into()),
                body: Some(body.into()),
            }),
            data: serde_json::Map::new(),
        }
    }

    /// 只有 data 的载荷
    pub fn data_only() -> Self {
        Self::default()
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    fn field(&self, name: &str) -> Option<String> {
        let from_alert = self.notification.as_ref().and_then(|alert| match name {
            "title" => alert.title.clone(),
            "body" => alert.body.clone(),
            _ => None,
        });

        from_alert
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                self.data
                    .get(name)
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .filter(|s| !s.trim().is_empty())
    }

    /// data 统一转成 string→string，非字符串值保留其 JSON 文本
    fn string_data(&self) -> HashMap<String, String> {
        self.data
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }
}

/// 载荷被拒绝的原因（静默丢弃，不算错误）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// 既无标题也无正文（纯数据推送）
    DataOnly,
    MissingTitle,
    MissingBody,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::DataOnly => write!(f, "data-only payload"),
            RejectReason::MissingTitle => write!(f, "missing title"),
            RejectReason::MissingBody => write!(f, "missing body"),
        }
    }
}

/// 通知记录，创建后只有已读标记可以变化（且只能从未读变为已读）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// 设备内唯一 ID（毫秒时间戳 + 随机后缀）
    pub id: String,
    pub title: String,
    pub body: String,
    /// 原样转发的自定义数据
    #[serde(default)]
    pub data: HashMap<String, String>,
    /// 规范化时间
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    is_read: bool,
    /// 推送服务消息 ID，用于去重和匹配系统展示的通知
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl Notification {
    /// 校验并规范化原始载荷
    pub fn from_payload(payload: &RawPayload) -> Result<Self, RejectReason> {
        let (title, body) = match (payload.field("title"), payload.field("body")) {
            (Some(title), Some(body)) => (title, body),
            (None, None) => return Err(RejectReason::DataOnly),
            (None, Some(_)) => return Err(RejectReason::MissingTitle),
            (Some(_), None) => return Err(RejectReason::MissingBody),
        };

        Ok(Self {
            id: generate_id(),
            title,
            body,
            data: payload.string_data(),
            timestamp: Utc::now(),
            is_read: false,
            message_id: payload.message_id.clone(),
        })
    }

    /// 路由类型，缺省为 `general`
    pub fn kind(&self) -> &str {
        self.data.get("type").map(String::as_str).unwrap_or(DEFAULT_KIND)
    }

    pub fn is_read(&self) -> bool {
        self.is_read
    }

    /// 标记已读，返回状态是否发生变化
    pub fn mark_read(&mut self) -> bool {
        let changed = !self.is_read;
        self.is_read = true;
        changed
    }
}

/// 生成通知 ID：`<毫秒时间戳>-<9 位随机字母数字>`
pub fn generate_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

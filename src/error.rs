//! 错误类型 - 引擎各层的错误分类
//!
//! - `StorageError`：持久化读写失败（记录日志，本次操作中止，下次触发时重试）
//! - `PlatformError`：平台调用失败（展示、权限、推送 SDK），展示失败只记录不阻断
//! - `IngestError` / `DrainError`：摄取与队列同步对外暴露的错误
//!
//! 缺少标题/正文的推送不是错误，见 `notification::RejectReason`。

use thiserror::Error;

/// 持久化层错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode/decode key {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn codec(key: &str, source: serde_json::Error) -> Self {
        Self::Codec {
            key: key.to_string(),
            source,
        }
    }
}

/// 平台协作方调用错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("platform call failed: {0}")]
    Failed(String),

    #[error("platform capability unavailable: {0}")]
    Unavailable(String),
}

/// 摄取错误（只有数据路径写入失败才会返回）
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to persist notification {id}: {source}")]
    Persistence {
        id: String,
        #[source]
        source: StorageError,
    },
}

/// 离线队列同步错误
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("drain aborted after {drained} item(s): {source}")]
    Persistence {
        drained: usize,
        #[source]
        source: StorageError,
    },
}

impl DrainError {
    /// 中止前已经提交到存储的条数
    pub fn drained(&self) -> usize {
        match self {
            DrainError::Persistence { drained, .. } => *drained,
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_error_reports_partial_progress() {
        let err = DrainError::Persistence {
            drained: 2,
            source: StorageError::Backend("disk full".to_string()),
        };
        assert_eq!(err.drained(), 2);
        assert!(err.to_string().contains("after 2 item(s)"));
    }

    #[test]
    fn test_codec_error_names_key() {
        let source = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = StorageError::codec("push_inbox.badge_count", source);
        assert!(err.to_string().contains("push_inbox.badge_count"));
    }
}

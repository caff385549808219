//! 引擎配置
//!
//! 读取顺序：
//! 1. 显式传入的配置文件路径
//! 2. `~/.config/push-inbox/config.json`
//! 3. 内置默认值
//!
//! 所有字段都有默认值，配置文件只需写需要覆盖的部分：
//! ```json
//! { "capacity": 50, "channel": { "id": "orders", "name": "Orders" } }
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::channel::ChannelSpec;
use crate::notification::dedup::DEFAULT_DEDUP_WINDOW;
use crate::notification::DEFAULT_CAPACITY;
use crate::storage::FileKvStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 通知存储容量
    pub capacity: usize,
    /// message_id 去重窗口（秒）
    pub dedup_window_secs: u64,
    /// 通知渠道
    pub channel: ChannelSpec,
    /// 文件存储目录，缺省为 `~/.config/push-inbox`
    pub data_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            dedup_window_secs: DEFAULT_DEDUP_WINDOW.as_secs(),
            channel: ChannelSpec::default(),
            data_dir: None,
        }
    }
}

impl EngineConfig {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        FileKvStore::default_dir().join("config.json")
    }

    /// 从指定文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    /// 自动加载：默认路径存在时读取，否则使用默认值
    pub fn auto_load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            bail!("capacity must be at least 1");
        }
        Ok(())
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    /// 文件存储目录
    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(FileKvStore::default_dir)
    }
}

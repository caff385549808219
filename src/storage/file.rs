//! 文件键值存储 - 每个键一个文件，写入时持有目录级文件锁
//!
//! 写入流程：加排他锁 → 写临时文件 → rename 原子替换 → 解锁。
//! 读取持有共享锁，避免读到写了一半的文件。

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::KeyValueStore;
use crate::error::{StorageError, StorageResult};

const LOCK_FILE: &str = ".lock";

#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    /// 在指定目录创建存储（目录不存在时自动创建）
    pub fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Opened file key-value store");
        Ok(Self { dir })
    }

    /// 默认数据目录 `~/.config/push-inbox`
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("push-inbox")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(dir: &Path, key: &str) -> PathBuf {
        let mut name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
            .collect();
        // 空键或纯点号（`.`、`..`）会指向目录本身或上级目录
        if name.chars().all(|c| c == '.') {
            name = "_".repeat(name.len().max(1));
        }
        dir.join(name)
    }

    fn open_lock(dir: &Path) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))
    }

    fn read_blocking(dir: &Path, key: &str) -> std::io::Result<Option<Vec<u8>>> {
        let lock = Self::open_lock(dir)?;
        lock.lock_shared()?;
        let result = match fs::read(Self::key_path(dir, key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        };
        let _ = lock.unlock();
        result
    }

    fn write_blocking(dir: &Path, key: &str, value: &[u8]) -> std::io::Result<()> {
        let lock = Self::open_lock(dir)?;
        lock.lock_exclusive()?;
        let result = (|| {
            let path = Self::key_path(dir, key);
            let mut temp_name = path.clone().into_os_string();
            temp_name.push(".tmp");
            let temp_path = PathBuf::from(temp_name);
            {
                let mut temp_file = File::create(&temp_path)?;
                temp_file.write_all(value)?;
                temp_file.sync_all()?;
            }
            fs::rename(&temp_path, &path)
        })();
        let _ = lock.unlock();
        result
    }

    fn remove_blocking(dir: &Path, key: &str) -> std::io::Result<()> {
        let lock = Self::open_lock(dir)?;
        lock.lock_exclusive()?;
        let result = match fs::remove_file(Self::key_path(dir, key)) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        };
        let _ = lock.unlock();
        result
    }

    async fn run_blocking<T, F>(&self, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(PathBuf) -> std::io::Result<T> + Send + 'static,
    {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || op(dir))
            .await
            .map_err(|e| StorageError::Backend(format!("storage task failed: {}", e)))?
            .map_err(StorageError::from)
    }
}

#[async_trait]
impl KeyValueStore for FileKvStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run_blocking(move |dir| Self::read_blocking(&dir, &key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let key = key.to_string();
        self.run_blocking(move |dir| Self::write_blocking(&dir, &key, &value)).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.run_blocking(move |dir| Self::remove_blocking(&dir, &key)).await
    }
}

//! 下载计数账本
//!
//! 文件名到累计下载次数的映射。每次访问都完整地读取、修改、写回，
//! 数据量只是少量计数器，因此不做增量更新。
//!
//! 存储后端可注入：
//! - [`JsonFileBackend`]: 生产环境，单个 JSON 文件
//! - [`MemoryBackend`]: 测试用，进程内
//!
//! [`Ledger`] 内部持有一把异步互斥锁，使每个读-改-写周期串行执行，
//! 并发下载不会互相覆盖计数。

use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// 账本中的全部计数
pub type Counts = HashMap<String, u64>;

/// 账本错误
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// 账本持久化后端
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// 读取完整映射；尚无记录时返回空映射
    async fn load(&self) -> Result<Counts, LedgerError>;

    /// 整体替换已持久化的映射
    async fn store(&self, counts: &Counts) -> Result<(), LedgerError>;
}

/// 以单个 JSON 对象保存的账本文件
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LedgerBackend for JsonFileBackend {
    async fn load(&self) -> Result<Counts, LedgerError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Counts::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, counts: &Counts) -> Result<(), LedgerError> {
        let content = serde_json::to_vec(counts)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

/// 进程内账本，用于测试
#[derive(Default)]
pub struct MemoryBackend {
    counts: std::sync::Mutex<Counts>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerBackend for MemoryBackend {
    async fn load(&self) -> Result<Counts, LedgerError> {
        Ok(self
            .counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    async fn store(&self, counts: &Counts) -> Result<(), LedgerError> {
        *self
            .counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = counts.clone();
        Ok(())
    }
}

/// 下载计数账本
pub struct Ledger {
    backend: Box<dyn LedgerBackend>,
    lock: Mutex<()>,
}

impl Ledger {
    pub fn new(backend: impl LedgerBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            lock: Mutex::new(()),
        }
    }

    /// 基于 JSON 文件的账本
    pub fn json_file(path: impl Into<PathBuf>) -> Self {
        Self::new(JsonFileBackend::new(path))
    }

    /// 基于内存的账本
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// 读取全部计数
    pub async fn get_all(&self) -> Result<Counts, LedgerError> {
        let _guard = self.lock.lock().await;
        self.backend.load().await
    }

    /// 单个文件的下载次数，不存在时为 0
    pub async fn count(&self, name: &str) -> Result<u64, LedgerError> {
        Ok(self.get_all().await?.get(name).copied().unwrap_or(0))
    }

    /// 下载次数加一，返回新的计数
    pub async fn increment(&self, name: &str) -> Result<u64, LedgerError> {
        let _guard = self.lock.lock().await;
        let mut counts = self.backend.load().await?;
        let count = counts.entry(name.to_string()).or_insert(0);
        *count += 1;
        let new_count = *count;
        self.backend.store(&counts).await?;
        debug!("Download count for {} is now {}", name, new_count);
        Ok(new_count)
    }

    /// 首次出现的文件名初始化为 0，已有计数保持不变
    ///
    /// 返回是否新建了条目。
    pub async fn init_if_absent(&self, name: &str) -> Result<bool, LedgerError> {
        let _guard = self.lock.lock().await;
        let mut counts = self.backend.load().await?;
        if counts.contains_key(name) {
            return Ok(false);
        }
        counts.insert(name.to_string(), 0);
        self.backend.store(&counts).await?;
        Ok(true)
    }

    /// 删除条目（不存在时也会写回）
    pub async fn remove(&self, name: &str) -> Result<(), LedgerError> {
        let _guard = self.lock.lock().await;
        let mut counts = self.backend.load().await?;
        if counts.remove(name).is_none() {
            debug!("No ledger entry for {}", name);
        }
        self.backend.store(&counts).await
    }
}

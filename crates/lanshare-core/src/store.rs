//! 共享文件目录
//!
//! 上传目录下的文件列表、保存、下载和删除。所有客户端提交的文件名都先经过
//! [`secure_filename`] 处理；下载计数的维护委托给 [`Ledger`]。

use crate::ledger::{Ledger, LedgerError};
use crate::sanitize::secure_filename;
use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const MIB: f64 = 1024.0 * 1024.0;

/// 文件目录错误
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid filename")]
    InvalidName,

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Upload interrupted: {0}")]
    Upload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// 目录中的一个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub size_bytes: u64,
    pub downloads: u64,
}

impl StoredFile {
    /// 人类可读的大小
    pub fn formatted_size(&self) -> String {
        format_size(self.size_bytes)
    }
}

/// 一次上传的结果
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub name: String,
    pub size_bytes: u64,
    pub elapsed: Duration,
}

impl SavedFile {
    /// 写盘吞吐量 (MB/s)，耗时为 0 时返回 0
    pub fn upload_speed_mb_s(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.size_bytes as f64 / secs / MIB
        } else {
            0.0
        }
    }
}

/// 已打开、等待流式发送的文件
pub struct OpenedFile {
    pub name: String,
    pub size_bytes: u64,
    pub file: File,
}

/// 共享文件目录
pub struct FileStore {
    root: PathBuf,
    ledger: Arc<Ledger>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, ledger: Arc<Ledger>) -> Self {
        Self {
            root: root.into(),
            ledger,
        }
    }

    /// 目录路径
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 下载计数账本
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// 创建上传目录
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// 列出目录下的普通文件（不递归）
    ///
    /// 顺序取决于底层目录遍历，调用方不应假设有序。
    pub async fn list(&self) -> Result<Vec<StoredFile>, StoreError> {
        let counts = self.ledger.get_all().await?;

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let downloads = counts.get(&name).copied().unwrap_or(0);
            files.push(StoredFile {
                name,
                size_bytes: metadata.len(),
                downloads,
            });
        }

        Ok(files)
    }

    /// 将上传内容流式写入目录
    ///
    /// 同名文件会被直接覆盖。首次出现的文件名在账本中初始化为 0。
    pub async fn save<S, E>(&self, raw_name: &str, body: S) -> Result<SavedFile, StoreError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        let mut body = pin!(body);
        let name = secure_filename(raw_name);
        if name.is_empty() {
            return Err(StoreError::InvalidName);
        }
        let path = self.root.join(&name);

        let start = Instant::now();
        let mut file = File::create(&path).await?;
        let mut size_bytes: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                        warn!("Failed to remove partial upload {:?}: {}", path, remove_err);
                    }
                    return Err(StoreError::Upload(e.to_string()));
                }
            };
            file.write_all(&chunk).await?;
            size_bytes += chunk.len() as u64;
        }
        file.flush().await?;
        let elapsed = start.elapsed();

        if self.ledger.init_if_absent(&name).await? {
            debug!("New file registered in ledger: {}", name);
        }

        info!("Saved {} ({} bytes in {:?})", name, size_bytes, elapsed);

        Ok(SavedFile {
            name,
            size_bytes,
            elapsed,
        })
    }

    /// 打开文件用于下载
    pub async fn open_for_download(&self, raw_name: &str) -> Result<OpenedFile, StoreError> {
        let name = secure_filename(raw_name);
        if name.is_empty() {
            return Err(StoreError::NotFound(raw_name.to_string()));
        }
        let path = self.root.join(&name);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(StoreError::NotFound(name)),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound(name)),
            Err(e) => return Err(e.into()),
        };

        let file = File::open(&path).await?;
        Ok(OpenedFile {
            name,
            size_bytes: metadata.len(),
            file,
        })
    }

    /// 下载计数加一
    pub async fn record_download(&self, name: &str) -> Result<u64, StoreError> {
        Ok(self.ledger.increment(name).await?)
    }

    /// 删除文件及其账本条目，文件不存在时不报错
    ///
    /// 返回是否确实删除了文件。
    pub async fn delete(&self, raw_name: &str) -> Result<bool, StoreError> {
        let name = secure_filename(raw_name);
        if name.is_empty() {
            return Ok(false);
        }

        let removed = match tokio::fs::remove_file(self.root.join(&name)).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        self.ledger.remove(&name).await?;

        if removed {
            info!("Deleted {}", name);
        } else {
            debug!("Delete requested for missing file {}", name);
        }
        Ok(removed)
    }
}

/// 格式化文件大小: `B` / `KB` / `MB`，保留一位小数
pub fn format_size(size_bytes: u64) -> String {
    if size_bytes < 1024 {
        format!("{} B", size_bytes)
    } else if size_bytes < 1024 * 1024 {
        format!("{:.1} KB", size_bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", size_bytes as f64 / MIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::convert::Infallible;

    fn body(data: &'static [u8]) -> impl Stream<Item = Result<Bytes, Infallible>> {
        stream::iter(data.chunks(4).map(|c| Ok(Bytes::from_static(c))).collect::<Vec<_>>())
    }

    fn make_store() -> (tempfile::TempDir, FileStore) {
        let temp = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp.path().join("uploads"), Arc::new(Ledger::in_memory()));
        (temp, store)
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }

    #[test]
    fn test_upload_speed_zero_elapsed() {
        let saved = SavedFile {
            name: "a".to_string(),
            size_bytes: 10,
            elapsed: Duration::ZERO,
        };
        assert_eq!(saved.upload_speed_mb_s(), 0.0);

        let saved = SavedFile {
            name: "a".to_string(),
            size_bytes: 2 * 1024 * 1024,
            elapsed: Duration::from_secs(1),
        };
        assert!((saved.upload_speed_mb_s() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let (_temp, store) = make_store();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_then_list() {
        let (_temp, store) = make_store();
        store.ensure_dirs().await.unwrap();

        let saved = store.save("hello.txt", body(b"hello world")).await.unwrap();
        assert_eq!(saved.name, "hello.txt");
        assert_eq!(saved.size_bytes, 11);

        let files = store.list().await.unwrap();
        assert_eq!(
            files,
            vec![StoredFile {
                name: "hello.txt".to_string(),
                size_bytes: 11,
                downloads: 0,
            }]
        );
    }

    #[tokio::test]
    async fn test_list_skips_subdirectories() {
        let (_temp, store) = make_store();
        store.ensure_dirs().await.unwrap();
        tokio::fs::create_dir(store.root().join("nested")).await.unwrap();
        tokio::fs::write(store.root().join("nested").join("inner.txt"), b"x")
            .await
            .unwrap();
        store.save("top.txt", body(b"abc")).await.unwrap();

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["top.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_save_sanitizes_name() {
        let (_temp, store) = make_store();
        store.ensure_dirs().await.unwrap();

        let saved = store.save("../../evil name.sh", body(b"#!")).await.unwrap();
        assert_eq!(saved.name, "evil_name.sh");
        assert!(store.root().join("evil_name.sh").is_file());
    }

    #[tokio::test]
    async fn test_save_rejects_empty_name() {
        let (_temp, store) = make_store();
        store.ensure_dirs().await.unwrap();
        assert!(matches!(
            store.save("../..", body(b"x")).await,
            Err(StoreError::InvalidName)
        ));
    }

    #[tokio::test]
    async fn test_reupload_keeps_count_and_overwrites() {
        let (_temp, store) = make_store();
        store.ensure_dirs().await.unwrap();

        store.save("a.txt", body(b"first")).await.unwrap();
        store.record_download("a.txt").await.unwrap();
        store.save("a.txt", body(b"second!")).await.unwrap();

        let files = store.list().await.unwrap();
        assert_eq!(files[0].downloads, 1);
        assert_eq!(files[0].size_bytes, 7);
    }

    #[tokio::test]
    async fn test_failed_stream_removes_partial_file() {
        let (_temp, store) = make_store();
        store.ensure_dirs().await.unwrap();

        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"part")),
            Err("connection reset".to_string()),
        ];
        let result = store.save("broken.bin", stream::iter(chunks)).await;
        assert!(matches!(result, Err(StoreError::Upload(_))));
        assert!(!store.root().join("broken.bin").exists());
        assert_eq!(store.ledger().count("broken.bin").await.unwrap(), 0);
        assert!(store.ledger().get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let (_temp, store) = make_store();
        store.ensure_dirs().await.unwrap();
        assert!(matches!(
            store.open_for_download("nope.txt").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_ledger_entry() {
        let (_temp, store) = make_store();
        store.ensure_dirs().await.unwrap();
        store.save("a.txt", body(b"data")).await.unwrap();
        store.record_download("a.txt").await.unwrap();

        assert!(store.delete("a.txt").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.ledger().get_all().await.unwrap().is_empty());

        assert!(!store.delete("a.txt").await.unwrap());
        assert!(!store.delete("never-existed.txt").await.unwrap());
    }
}

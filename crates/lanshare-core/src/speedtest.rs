//! 网速测试
//!
//! - 下载测速: 生成指定大小的随机内容文件，客户端下载后调用清理
//! - 上传测速: 接收客户端上传的数据并丢弃，根据客户端上报的开始时间计算吞吐量
//!
//! 上传测速的耗时是 `服务端接收完成时间 - 客户端上报的开始时间`，
//! 包含了客户端时钟偏差和请求排队的时间，只是近似值。

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// 1 MiB，同时也是生成文件时的写入块大小
pub const MIB: usize = 1024 * 1024;

/// 单个测速文件的默认上限 (MB)
pub const MAX_SPEEDTEST_MB: u64 = 100;

/// 测速错误
#[derive(Debug, thiserror::Error)]
pub enum SpeedtestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid form field: {0}")]
    InvalidField(&'static str),
}

/// 生成好的测速文件
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub filename: String,
    pub size_mb: u64,
}

/// 将请求的大小限制在上限以内，超出部分静默截断
pub fn clamp_size_mb(requested: u64, max: u64) -> u64 {
    requested.min(max)
}

/// 测速临时目录
pub struct SpeedtestArea {
    root: PathBuf,
    max_size_mb: u64,
    // 生成与清理互斥；正在进行的下载不受保护
    lock: Mutex<()>,
}

impl SpeedtestArea {
    pub fn new(root: impl Into<PathBuf>, max_size_mb: u64) -> Self {
        Self {
            root: root.into(),
            max_size_mb,
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 创建测速目录
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// 生成 `size_mb` MiB 的随机内容文件
    ///
    /// 以固定 1 MiB 缓冲区分块写入，内存占用与文件大小无关。
    pub async fn generate(&self, size_mb: u64) -> Result<GeneratedFile, SpeedtestError> {
        let size_mb = clamp_size_mb(size_mb, self.max_size_mb);
        let filename = speedtest_filename(size_mb);
        let path = self.root.join(&filename);

        let _guard = self.lock.lock().await;
        debug!("Generating {} ({} MB)", filename, size_mb);

        let mut file = File::create(&path).await?;
        write_or_remove(&mut file, &path, size_mb).await?;

        info!("Generated speedtest file {} ({} MB)", filename, size_mb);
        Ok(GeneratedFile { filename, size_mb })
    }

    /// 测速文件路径；文件名非法或文件不存在时返回 `None`
    pub async fn locate(&self, raw_name: &str) -> Option<PathBuf> {
        let name = crate::sanitize::secure_filename(raw_name);
        if name.is_empty() {
            return None;
        }
        let path = self.root.join(name);
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => Some(path),
            _ => None,
        }
    }

    /// 删除目录中所有普通文件，返回删除数量
    pub async fn clean_all(&self) -> Result<usize, SpeedtestError> {
        let _guard = self.lock.lock().await;

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.metadata().await?.is_file() {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => count += 1,
                // 可能已被其他请求删除
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Speedtest file vanished: {:?}", entry.path());
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!("Removed {} speedtest files", count);
        Ok(count)
    }
}

async fn write_random<W>(writer: &mut W, size_mb: u64) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut rng = StdRng::from_entropy();
    let mut buffer = vec![0u8; MIB];
    for _ in 0..size_mb {
        rng.fill_bytes(&mut buffer);
        writer.write_all(&buffer).await?;
    }
    writer.flush().await
}

/// 写入失败时删除 `path`，不留下写了一半的文件
async fn write_or_remove<W>(writer: &mut W, path: &Path, size_mb: u64) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = write_random(writer, size_mb).await;
    if let Err(e) = &result {
        warn!("Speedtest write to {:?} failed: {}", path, e);
        let _ = tokio::fs::remove_file(path).await;
    }
    result
}

fn speedtest_filename(size_mb: u64) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("speedtest_{}_{}MB_{}.bin", secs, size_mb, &suffix[..8])
}

/// 当前 Unix 时间（秒，含小数）
pub fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// 一次上传测速的客户端参数
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadTrial {
    /// 客户端声明的数据大小（字节）
    pub file_size: u64,
    /// 客户端开始上传的 Unix 时间（秒）
    pub start_time: f64,
}

/// 上传测速结果
#[derive(Debug, Clone, Copy)]
pub struct TrialResult {
    pub speed_mb_s: f64,
    pub duration_secs: f64,
}

impl TrialResult {
    pub fn speed_formatted(&self) -> String {
        format!("{:.2} MB/s", self.speed_mb_s)
    }

    pub fn duration_formatted(&self) -> String {
        format!("{:.2} seconds", self.duration_secs)
    }
}

impl UploadTrial {
    /// 从表单字段解析，缺失的字段按 0 处理
    pub fn from_fields(
        file_size: Option<&str>,
        start_time: Option<&str>,
    ) -> Result<Self, SpeedtestError> {
        let file_size = match file_size.map(str::trim) {
            None | Some("") => 0,
            Some(v) => v
                .parse::<u64>()
                .map_err(|_| SpeedtestError::InvalidField("file_size"))?,
        };
        let start_time = match start_time.map(str::trim) {
            None | Some("") => 0.0,
            Some(v) => v
                .parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .ok_or(SpeedtestError::InvalidField("start_time"))?,
        };
        Ok(Self {
            file_size,
            start_time,
        })
    }

    /// 以 `now` 作为接收完成时间计算吞吐量；耗时不为正时速度为 0
    pub fn measure(&self, now: f64) -> TrialResult {
        let duration_secs = now - self.start_time;
        let speed_mb_s = if duration_secs > 0.0 {
            self.file_size as f64 / duration_secs / MIB as f64
        } else {
            0.0
        };
        TrialResult {
            speed_mb_s,
            duration_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_area(max: u64) -> (tempfile::TempDir, SpeedtestArea) {
        let temp = tempfile::tempdir().unwrap();
        let area = SpeedtestArea::new(temp.path().join("speedtest"), max);
        (temp, area)
    }

    #[test]
    fn test_clamp_size() {
        assert_eq!(clamp_size_mb(5, MAX_SPEEDTEST_MB), 5);
        assert_eq!(clamp_size_mb(100, MAX_SPEEDTEST_MB), 100);
        assert_eq!(clamp_size_mb(150, MAX_SPEEDTEST_MB), 100);
    }

    #[test]
    fn test_filename_format() {
        let name = speedtest_filename(25);
        assert!(name.starts_with("speedtest_"), "{}", name);
        assert!(name.contains("_25MB_"), "{}", name);
        assert!(name.ends_with(".bin"), "{}", name);
        assert_ne!(name, speedtest_filename(25));
    }

    #[tokio::test]
    async fn test_generate_exact_size() {
        let (_temp, area) = make_area(MAX_SPEEDTEST_MB);
        area.ensure_dirs().await.unwrap();

        let generated = area.generate(2).await.unwrap();
        assert_eq!(generated.size_mb, 2);

        let path = area.locate(&generated.filename).await.unwrap();
        let len = std::fs::metadata(path).unwrap().len();
        assert_eq!(len, 2 * MIB as u64);
    }

    #[tokio::test]
    async fn test_generate_clamps_to_area_max() {
        let (_temp, area) = make_area(1);
        area.ensure_dirs().await.unwrap();

        let generated = area.generate(7).await.unwrap();
        assert_eq!(generated.size_mb, 1);
        let path = area.locate(&generated.filename).await.unwrap();
        assert_eq!(std::fs::metadata(path).unwrap().len(), MIB as u64);
    }

    #[tokio::test]
    async fn test_generate_without_dir_fails() {
        let (_temp, area) = make_area(MAX_SPEEDTEST_MB);
        assert!(matches!(area.generate(1).await, Err(SpeedtestError::Io(_))));
    }

    #[tokio::test]
    async fn test_write_random_error_propagates() {
        // 只容得下 1 MiB 的写入端，第二块写入失败
        let mut sink = vec![0u8; MIB];
        let mut cursor = std::io::Cursor::new(&mut sink[..]);
        let err = write_random(&mut cursor, 2).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteZero);
    }

    #[tokio::test]
    async fn test_failed_write_removes_partial_file() {
        let (_temp, area) = make_area(MAX_SPEEDTEST_MB);
        area.ensure_dirs().await.unwrap();
        let path = area.root().join(speedtest_filename(2));
        std::fs::write(&path, b"partial").unwrap();

        let mut sink = vec![0u8; MIB];
        let mut cursor = std::io::Cursor::new(&mut sink[..]);
        assert!(write_or_remove(&mut cursor, &path, 2).await.is_err());
        assert!(!path.exists());
        assert_eq!(area.clean_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clean_counts_files_only() {
        let (_temp, area) = make_area(MAX_SPEEDTEST_MB);
        area.ensure_dirs().await.unwrap();
        area.generate(0).await.unwrap();
        area.generate(1).await.unwrap();
        tokio::fs::create_dir(area.root().join("keep")).await.unwrap();

        assert_eq!(area.clean_all().await.unwrap(), 2);
        assert_eq!(area.clean_all().await.unwrap(), 0);
        assert!(area.root().join("keep").is_dir());
    }

    #[tokio::test]
    async fn test_clean_missing_dir() {
        let (_temp, area) = make_area(MAX_SPEEDTEST_MB);
        assert_eq!(area.clean_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_locate_rejects_traversal() {
        let (temp, area) = make_area(MAX_SPEEDTEST_MB);
        area.ensure_dirs().await.unwrap();
        std::fs::write(temp.path().join("secret.txt"), b"x").unwrap();
        assert!(area.locate("../secret.txt").await.is_none());
        assert!(area.locate("missing.bin").await.is_none());
    }

    #[test]
    fn test_trial_measure() {
        let trial = UploadTrial {
            file_size: 10 * MIB as u64,
            start_time: 100.0,
        };
        let result = trial.measure(102.0);
        assert!((result.duration_secs - 2.0).abs() < 1e-9);
        assert!((result.speed_mb_s - 5.0).abs() < 1e-9);
        assert_eq!(result.speed_formatted(), "5.00 MB/s");
        assert_eq!(result.duration_formatted(), "2.00 seconds");
    }

    #[test]
    fn test_trial_non_positive_duration() {
        let trial = UploadTrial {
            file_size: MIB as u64,
            start_time: 200.0,
        };
        assert_eq!(trial.measure(200.0).speed_mb_s, 0.0);
        assert_eq!(trial.measure(150.0).speed_mb_s, 0.0);
    }

    #[test]
    fn test_trial_from_fields() {
        let trial = UploadTrial::from_fields(Some("1048576"), Some("1700000000.25")).unwrap();
        assert_eq!(trial.file_size, 1_048_576);
        assert!((trial.start_time - 1_700_000_000.25).abs() < 1e-6);

        let trial = UploadTrial::from_fields(None, None).unwrap();
        assert_eq!(trial.file_size, 0);
        assert_eq!(trial.start_time, 0.0);

        assert!(matches!(
            UploadTrial::from_fields(Some("abc"), None),
            Err(SpeedtestError::InvalidField("file_size"))
        ));
        assert!(matches!(
            UploadTrial::from_fields(None, Some("NaN")),
            Err(SpeedtestError::InvalidField("start_time"))
        ));
    }
}

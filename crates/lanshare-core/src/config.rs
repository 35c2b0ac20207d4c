//! 服务器配置和持久化
//!
//! 端口、绑定地址和各数据目录都有固定的默认值；工作目录下存在
//! `lanshare.toml` 时从中读取覆盖值。

use crate::speedtest::MAX_SPEEDTEST_MB;
use log::debug;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// 默认监听端口
pub const DEFAULT_PORT: u16 = 8282;

/// 默认绑定地址（所有网卡）
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// 默认配置文件名
pub const CONFIG_FILE_NAME: &str = "lanshare.toml";

/// 单个请求体的默认上限: 500 MiB
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// 服务器设置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// 绑定地址
    pub bind_address: String,
    /// 监听端口
    pub port: u16,
    /// 共享文件目录
    pub upload_dir: PathBuf,
    /// 测速临时目录
    pub speedtest_dir: PathBuf,
    /// 下载计数文件
    pub stats_file: PathBuf,
    /// 请求体大小上限（字节）
    pub max_upload_bytes: usize,
    /// 测速文件大小上限 (MB)
    pub max_speedtest_mb: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            upload_dir: PathBuf::from("uploads"),
            speedtest_dir: PathBuf::from("speedtest"),
            stats_file: PathBuf::from("download_stats.json"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_speedtest_mb: MAX_SPEEDTEST_MB,
        }
    }
}

impl ServerSettings {
    /// 默认配置文件路径（工作目录下）
    pub fn config_path() -> PathBuf {
        PathBuf::from(CONFIG_FILE_NAME)
    }

    /// 加载设置（如果文件不存在或无法解析则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 从指定路径加载设置
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 监听地址 `host:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// 所有数据路径都以 `base` 为根（用于测试和自定义工作目录）
    pub fn rooted_at(mut self, base: &Path) -> Self {
        self.upload_dir = base.join(&self.upload_dir);
        self.speedtest_dir = base.join(&self.speedtest_dir);
        self.stats_file = base.join(&self.stats_file);
        self
    }
}

//! Lanshare Core Library
//!
//! 局域网文件共享服务的核心实现：上传、列表、下载、删除，以及基于随机内容
//! 文件的网速测试。
//!
//! # 模块
//!
//! - **sanitize**: 客户端文件名清洗
//! - **store**: 共享文件目录
//! - **ledger**: 下载计数账本（可注入存储后端）
//! - **speedtest**: 测速文件生成、清理和上传测速计算
//! - **http**: axum 路由与内嵌页面
//! - **config**: 服务器设置
//! - **logging**: 日志级别
//!
//! # 使用示例
//!
//! ```ignore
//! use lanshare_core::{AppState, ServerSettings};
//! use std::sync::Arc;
//!
//! let state = Arc::new(AppState::from_settings(ServerSettings::load()));
//! lanshare_core::http::serve(state).await?;
//! ```

pub mod config;
pub mod http;
pub mod ledger;
pub mod logging;
pub mod sanitize;
pub mod speedtest;
pub mod store;

pub use config::ServerSettings;
pub use http::{AppState, router};
pub use ledger::{JsonFileBackend, Ledger, LedgerBackend, LedgerError, MemoryBackend};
pub use logging::LogLevel;
pub use sanitize::secure_filename;
pub use speedtest::{SpeedtestArea, SpeedtestError, TrialResult, UploadTrial};
pub use store::{FileStore, SavedFile, StoreError, StoredFile, format_size};

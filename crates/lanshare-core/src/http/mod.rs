//! HTTP 服务
//!
//! 路由只做参数校验和结果转换，具体逻辑在 [`FileStore`]、[`Ledger`] 和
//! [`SpeedtestArea`] 中。
//!
//! | 方法 | 路径 | 响应 |
//! |---|---|---|
//! | GET  | `/` | 文件列表页面 |
//! | POST | `/upload` | JSON |
//! | GET  | `/download/:filename` | 文件流，下载计数加一 |
//! | GET  | `/delete/:filename` | 重定向到 `/` |
//! | GET  | `/generate_speedtest_file/:size` | JSON |
//! | GET  | `/speedtest/download/:filename` | 文件流或 404 |
//! | POST | `/speedtest/upload` | JSON |
//! | GET  | `/clean_speedtest_files` | JSON |

mod handlers;
pub mod page;

use crate::config::ServerSettings;
use crate::ledger::Ledger;
use crate::speedtest::SpeedtestArea;
use crate::store::FileStore;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;

/// 所有请求共享的服务状态
pub struct AppState {
    pub settings: ServerSettings,
    pub store: FileStore,
    pub speedtest: SpeedtestArea,
}

impl AppState {
    /// 使用配置中的 JSON 文件作为下载计数账本
    pub fn from_settings(settings: ServerSettings) -> Self {
        let ledger = Ledger::json_file(&settings.stats_file);
        Self::with_ledger(settings, ledger)
    }

    /// 使用指定的账本（测试时可注入内存账本）
    pub fn with_ledger(settings: ServerSettings, ledger: Ledger) -> Self {
        let store = FileStore::new(&settings.upload_dir, Arc::new(ledger));
        let speedtest = SpeedtestArea::new(&settings.speedtest_dir, settings.max_speedtest_mb);
        Self {
            settings,
            store,
            speedtest,
        }
    }

    /// 创建上传目录和测速目录
    pub async fn prepare(&self) -> std::io::Result<()> {
        self.store.ensure_dirs().await?;
        self.speedtest.ensure_dirs().await
    }
}

/// 构建路由
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.settings.max_upload_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route("/upload", post(handlers::upload))
        .route("/download/:filename", get(handlers::download))
        .route("/delete/:filename", get(handlers::delete))
        .route(
            "/generate_speedtest_file/:size",
            get(handlers::generate_speedtest_file),
        )
        .route(
            "/speedtest/download/:filename",
            get(handlers::speedtest_download),
        )
        .route("/speedtest/upload", post(handlers::speedtest_upload))
        .route("/clean_speedtest_files", get(handlers::clean_speedtest_files))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// 启动 HTTP 服务器，直到服务器退出才返回
pub async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    state.prepare().await?;

    let addr = state.settings.listen_addr();
    let app = router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("File sharing server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

//! Lanshare Server
//!
//! 局域网文件共享服务：
//! - 上传、下载、删除共享文件
//! - 下载计数
//! - 浏览器端网速测试

use anyhow::Result;
use clap::Parser;
use lanshare_core::{AppState, LogLevel, ServerSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lanshare-server", version, about = "局域网文件共享与网速测试服务")]
struct Cli {
    /// 配置文件路径 (默认: ./lanshare.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 监听端口，覆盖配置文件
    #[arg(short, long)]
    port: Option<u16>,

    /// 绑定地址，覆盖配置文件
    #[arg(short, long)]
    bind: Option<String>,

    /// 日志级别 (error, warn, info, debug, trace)，未指定时读取 RUST_LOG
    #[arg(short, long)]
    log_level: Option<LogLevel>,
}

fn init_logging(level: Option<LogLevel>) {
    // 桥接 log crate（lanshare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let filter = match level {
        Some(level) => EnvFilter::new(level.filter_directive()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LogLevel::Info.filter_directive())),
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let mut settings = match &cli.config {
        Some(path) => ServerSettings::load_from(path),
        None => ServerSettings::load(),
    };
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(bind) = cli.bind {
        settings.bind_address = bind;
    }

    tracing::info!(
        "Lanshare starting: uploads={:?}, speedtest={:?}, stats={:?}",
        settings.upload_dir,
        settings.speedtest_dir,
        settings.stats_file
    );

    let state = Arc::new(AppState::from_settings(settings));
    if let Err(e) = lanshare_core::http::serve(state).await {
        tracing::error!("Server exited: {:#}", e);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "lanshare-server",
            "--port",
            "9090",
            "--bind",
            "127.0.0.1",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.port, Some(9090));
        assert_eq!(cli.bind.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_rejects_unknown_level() {
        assert!(Cli::try_parse_from(["lanshare-server", "--log-level", "loud"]).is_err());
    }
}

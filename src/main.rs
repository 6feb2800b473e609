use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use explorer::app::Application;
use explorer::shutdown::ShutdownManager;
use explorer_core::AppConfig;
use explorer_infrastructure::{init_metrics, init_structured_logging, LoggingConfig};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("explorer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("数据探查执行引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时按默认路径查找"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty", "compact"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<默认路径>")))?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_structured_logging(LoggingConfig::new(
        config.observability.log_level.clone(),
        &config.observability.log_format,
    ))?;

    if config.observability.metrics_enabled {
        init_metrics(config.observability.metrics_port)?;
        info!("Prometheus指标端口: {}", config.observability.metrics_port);
    }

    info!("启动数据探查执行引擎");
    let shutdown_timeout = Duration::from_secs(config.explore.shutdown_timeout_seconds + 5);
    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    wait_for_shutdown_signal().await?;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(shutdown_timeout, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("数据探查执行引擎已退出");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("监听Ctrl+C信号失败")?;
                info!("收到Ctrl+C信号");
            }
            _ = terminate.recv() => info!("收到SIGTERM信号"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("监听Ctrl+C信号失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}

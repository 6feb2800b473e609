//! Logging and metrics exporter initialization

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::structured_logger::{LogFormat, LoggingConfig};

/// Initialize structured logging with tracing
pub fn init_structured_logging(config: LoggingConfig) -> Result<()> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let level = config.level.clone();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.level.clone().into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_id)
                .with_thread_names(config.include_thread_name)
                .with_span_events(FmtSpan::CLOSE);

            registry
                .with(fmt_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("初始化日志失败: {e}"))?;
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_id)
                .with_thread_names(config.include_thread_name);

            registry
                .with(fmt_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("初始化日志失败: {e}"))?;
        }
        LogFormat::Compact => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_thread_ids(config.include_thread_id)
                .with_thread_names(config.include_thread_name);

            registry
                .with(fmt_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("初始化日志失败: {e}"))?;
        }
    }

    info!(
        logging.format = ?config.format,
        logging.level = level,
        logging.location = config.include_location,
        "Structured logging initialized"
    );

    Ok(())
}

/// Install the Prometheus exporter; must run inside a tokio runtime
pub fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    info!("Metrics initialized with Prometheus exporter on :{}", port);
    Ok(())
}

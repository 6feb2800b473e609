use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    explore::ExploreConfig,
    message_queue::MessageQueueConfig,
    observability::ObservabilityConfig,
    redis::RedisConfig,
    remote::{MetadataConfig, QueryServiceConfig},
};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub message_queue: MessageQueueConfig,
    pub query_service: QueryServiceConfig,
    pub metadata: MetadataConfig,
    pub explore: ExploreConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: EXPLORER_, nested with `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/explorer.toml", "explorer.toml", "/etc/explorer/config.toml"];
            if let Some(path) = default_paths.iter().find(|path| Path::new(path).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("EXPLORER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("构建配置失败")?;
        let app_config: AppConfig = config.try_deserialize().context("反序列化配置失败")?;

        app_config.validate().context("配置验证失败")?;

        Ok(app_config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let defaults = ConfigBuilder::try_from(&AppConfig::default()).context("构建默认配置失败")?;
        let config = ConfigBuilder::builder()
            .add_source(defaults)
            .add_source(File::from_str(toml_str, FileFormat::Toml))
            .build()
            .context("解析TOML配置失败")?;

        let app_config: AppConfig = config.try_deserialize().context("反序列化配置失败")?;
        app_config.validate().context("配置验证失败")?;

        Ok(app_config)
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.redis.validate().context("Redis配置验证失败")?;
        self.message_queue.validate().context("消息队列配置验证失败")?;
        self.query_service.validate().context("查询服务配置验证失败")?;
        self.metadata.validate().context("元数据服务配置验证失败")?;
        self.explore.validate().context("探查引擎配置验证失败")?;
        self.observability.validate().context("可观测性配置验证失败")?;
        Ok(())
    }
}

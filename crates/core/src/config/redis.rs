use serde::{Deserialize, Serialize};

/// Redis configuration (distributed lock backend)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub key_prefix: String,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            key_prefix: "explorer".to_string(),
            connection_timeout_seconds: 5,
        }
    }
}

impl RedisConfig {
    /// Validate Redis configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Redis主机地址不能为空"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Redis端口必须大于0"));
        }

        if self.database < 0 {
            return Err(anyhow::anyhow!("Redis数据库索引不能为负数"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Redis连接超时时间必须大于0"));
        }

        Ok(())
    }

    /// Build Redis connection URL
    pub fn build_url(&self) -> String {
        let auth = if let Some(password) = &self.password {
            format!(":{password}@")
        } else {
            String::new()
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.host, self.port, self.database
        )
    }
}

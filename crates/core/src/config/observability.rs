use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// json | pretty | compact
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9464,
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!("无效的日志级别: {}", self.log_level));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!("无效的日志格式: {}", self.log_format));
        }

        if self.metrics_enabled && self.metrics_port == 0 {
            return Err(anyhow::anyhow!("指标端口必须大于0"));
        }

        Ok(())
    }
}

use serde::{Deserialize, Serialize};

/// Remote query service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryServiceConfig {
    pub endpoint: String,
    pub request_timeout_seconds: u64,
}

impl Default for QueryServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8090".to_string(),
            request_timeout_seconds: 600,
        }
    }
}

impl QueryServiceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_http_endpoint("查询服务", &self.endpoint)?;
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("查询请求超时时间必须大于0"));
        }
        Ok(())
    }
}

/// Metadata (catalog) service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub endpoint: String,
    pub request_timeout_seconds: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8091".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl MetadataConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_http_endpoint("元数据服务", &self.endpoint)?;
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("元数据请求超时时间必须大于0"));
        }
        Ok(())
    }
}

fn validate_http_endpoint(name: &str, endpoint: &str) -> anyhow::Result<()> {
    if endpoint.is_empty() {
        return Err(anyhow::anyhow!("{name}地址不能为空"));
    }
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(anyhow::anyhow!("{name}地址必须以http://或https://开头: {endpoint}"));
    }
    Ok(())
}

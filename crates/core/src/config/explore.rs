use serde::{Deserialize, Serialize};

/// 查询重试的退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Remote query retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryRetryConfig {
    /// 总尝试次数（包含首次调用）
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: BackoffKind,
    pub jitter: bool,
}

impl Default for QueryRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff: BackoffKind::Exponential,
            jitter: true,
        }
    }
}

impl QueryRetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("查询重试次数必须大于0"));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }
        Ok(())
    }
}

/// Exploration engine configuration
///
/// 在启动时构造一次，显式传入拆分器与分组执行器。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExploreConfig {
    /// 进程内同时执行的规则查询总数上限
    pub concurrency_limit: usize,
    /// 单个报告内同时执行的规则查询上限
    pub concurrency_task_limit: usize,
    pub split_interval_seconds: u64,
    pub discovery_interval_seconds: u64,
    pub discovery_batch_size: i64,
    pub dispatch_poll_interval_ms: u64,
    pub report_lock_ttl_seconds: u64,
    pub split_lock_ttl_seconds: u64,
    pub default_sample_size: i64,
    pub shutdown_timeout_seconds: u64,
    pub query_retry: QueryRetryConfig,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 20,
            concurrency_task_limit: 5,
            split_interval_seconds: 60,
            discovery_interval_seconds: 10,
            discovery_batch_size: 100,
            dispatch_poll_interval_ms: 200,
            report_lock_ttl_seconds: 30,
            split_lock_ttl_seconds: 60,
            default_sample_size: 100_000,
            shutdown_timeout_seconds: 30,
            query_retry: QueryRetryConfig::default(),
        }
    }
}

impl ExploreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency_limit == 0 {
            return Err(anyhow::anyhow!("全局并发上限必须大于0"));
        }
        if self.concurrency_task_limit == 0 {
            return Err(anyhow::anyhow!("报告内并发上限必须大于0"));
        }
        if self.split_interval_seconds == 0 || self.discovery_interval_seconds == 0 {
            return Err(anyhow::anyhow!("拆分与发现间隔必须大于0"));
        }
        if self.discovery_batch_size <= 0 {
            return Err(anyhow::anyhow!("发现批次大小必须大于0"));
        }
        if self.dispatch_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("派发轮询间隔必须大于0"));
        }
        if self.report_lock_ttl_seconds < 2 {
            return Err(anyhow::anyhow!("报告锁TTL至少为2秒"));
        }
        if self.split_lock_ttl_seconds == 0 {
            return Err(anyhow::anyhow!("拆分锁TTL必须大于0"));
        }
        if self.default_sample_size <= 0 {
            return Err(anyhow::anyhow!("默认采样行数必须大于0"));
        }
        self.query_retry.validate()
    }

    /// 分组池大小：`concurrency_limit / concurrency_task_limit`，至少为1
    pub fn max_groups(&self) -> usize {
        (self.concurrency_limit / self.concurrency_task_limit.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_groups_has_floor_of_one() {
        let mut config = ExploreConfig::default();
        assert_eq!(config.max_groups(), 4);

        config.concurrency_limit = 3;
        config.concurrency_task_limit = 5;
        assert_eq!(config.max_groups(), 1);

        config.concurrency_limit = 11;
        config.concurrency_task_limit = 2;
        assert_eq!(config.max_groups(), 5);
    }

    #[test]
    fn test_validate_rejects_zero_task_limit() {
        let config = ExploreConfig {
            concurrency_task_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_bounds() {
        let retry = QueryRetryConfig {
            base_delay_ms: 500,
            max_delay_ms: 100,
            ..Default::default()
        };
        assert!(retry.validate().is_err());
    }
}

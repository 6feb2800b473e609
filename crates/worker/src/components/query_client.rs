use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use explorer_core::config::{BackoffKind, QueryRetryConfig};
use explorer_core::models::{QueryPage, Row, TableRef};
use explorer_core::traits::RemoteQueryService;
use explorer_core::{ExploreError, ExploreResult};
use explorer_infrastructure::MetricsCollector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 抖动幅度：在计算出的间隔上下浮动 10%
const JITTER_FACTOR: f64 = 0.1;

/// 远程查询客户端：有限次退避重试 + 续页拉取
///
/// 每一页独立重试，重试耗尽时返回最后一次的错误；配置类错误与取消不重试。
pub struct RetryingQueryClient {
    service: Arc<dyn RemoteQueryService>,
    policy: QueryRetryConfig,
    request_timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl RetryingQueryClient {
    pub fn new(
        service: Arc<dyn RemoteQueryService>,
        policy: QueryRetryConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            service,
            policy,
            request_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 执行查询并跟随续页 token 拉取全部结果行
    pub async fn query_with_continuation(
        &self,
        table: &TableRef,
        sql: &str,
        cancel: &CancellationToken,
    ) -> ExploreResult<Vec<Row>> {
        let mut rows = Vec::new();
        let mut token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let page = self.execute_with_retry(table, sql, token.as_deref(), cancel).await?;
            rows.extend(page.rows);

            match page.next_token {
                Some(next) if !next.is_empty() => {
                    if !seen_tokens.insert(next.clone()) {
                        return Err(ExploreError::RemoteQuery(format!(
                            "远程查询返回了重复的续页token: {next}"
                        )));
                    }
                    debug!(rows = rows.len(), "继续拉取下一页结果");
                    token = Some(next);
                }
                _ => break,
            }
        }

        Ok(rows)
    }

    async fn execute_with_retry(
        &self,
        table: &TableRef,
        sql: &str,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> ExploreResult<QueryPage> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(ExploreError::canceled("查询在发起前被取消"));
            }

            let call = self.service.execute(table, sql, token, self.request_timeout);
            let result = match tokio::time::timeout(self.request_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(ExploreError::Timeout(format!(
                    "远程查询超过 {}s 未返回",
                    self.request_timeout.as_secs()
                ))),
            };

            let error = match result {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= max_attempts {
                return Err(error);
            }

            let delay = backoff_delay(&self.policy, attempt);
            warn!(
                attempt = attempt,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "远程查询失败，准备重试"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_query_retry(attempt);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(ExploreError::canceled("查询在重试等待期间被取消"));
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// 第 `attempt` 次失败后的等待时间
pub fn backoff_delay(policy: &QueryRetryConfig, attempt: u32) -> Duration {
    let base = policy.base_delay_ms as f64;
    let max = policy.max_delay_ms.max(policy.base_delay_ms) as f64;

    let interval = match policy.backoff {
        BackoffKind::Fixed => base,
        BackoffKind::Exponential => base * 2f64.powi(attempt.saturating_sub(1).min(30) as i32),
    };
    let capped = interval.min(max);

    let millis = if policy.jitter {
        let jitter = capped * JITTER_FACTOR * (rand::random::<f64>() - 0.5) * 2.0;
        (capped + jitter).clamp(0.0, max)
    } else {
        capped
    };

    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffKind, jitter: bool) -> QueryRetryConfig {
        QueryRetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            backoff,
            jitter,
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = policy(BackoffKind::Exponential, false);
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&policy, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(&policy, 5), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&policy, 40), Duration::from_millis(1000));
    }

    #[test]
    fn test_fixed_backoff_with_jitter_stays_in_band() {
        let policy = policy(BackoffKind::Fixed, true);
        for attempt in 1..20 {
            let delay = backoff_delay(&policy, attempt).as_millis();
            assert!((90..=110).contains(&delay), "delay {delay} out of band");
        }
    }
}

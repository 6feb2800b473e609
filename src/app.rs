use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use explorer_core::{AppConfig, ExecutionContext};
use explorer_dispatcher::{GroupExecutor, LifecycleNotifier, LockGate, TaskSplitter};
use explorer_infrastructure::{
    DatabaseManager, MetricsCollector, PostgresReportItemRepository, PostgresReportRepository,
    PostgresTaskConfigRepository, RabbitMQEventPublisher, RedisLockService,
};
use explorer_worker::{HttpMetadataResolver, HttpQueryService, RetryingQueryClient, RuleQueryWorker};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 探查引擎进程：装配所有组件并运行拆分与发现两个周期循环
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    splitter: Arc<TaskSplitter>,
    executor: Arc<GroupExecutor>,
    ctx: ExecutionContext,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("连接数据库: {}", mask_url(&config.database.url));
        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        sqlx::migrate!("./migrations")
            .run(database.pool())
            .await
            .context("运行数据库迁移失败")?;

        let task_configs = Arc::new(PostgresTaskConfigRepository::new(database.pool().clone()));
        let reports = Arc::new(PostgresReportRepository::new(database.pool().clone()));
        let items = Arc::new(PostgresReportItemRepository::new(database.pool().clone()));

        info!("连接Redis: {}:{}", config.redis.host, config.redis.port);
        let locks = Arc::new(
            RedisLockService::new(&config.redis)
                .await
                .context("连接Redis失败")?,
        );

        info!("连接消息队列: {}", mask_url(&config.message_queue.url));
        let publisher = Arc::new(
            RabbitMQEventPublisher::new(&config.message_queue)
                .await
                .context("连接消息队列失败")?,
        );

        let query_service = Arc::new(
            HttpQueryService::new(&config.query_service).context("创建远程查询客户端失败")?,
        );
        let metadata = Arc::new(
            HttpMetadataResolver::new(&config.metadata).context("创建元数据客户端失败")?,
        );

        let metrics = Arc::new(MetricsCollector::new());
        let explore = &config.explore;

        let notifier = Arc::new(LifecycleNotifier::new(
            reports.clone(),
            publisher,
            config.message_queue.completion_topic.clone(),
            metrics.clone(),
        ));
        let client = Arc::new(
            RetryingQueryClient::new(
                query_service,
                explore.query_retry.clone(),
                Duration::from_secs(config.query_service.request_timeout_seconds),
            )
            .with_metrics(metrics.clone()),
        );
        let worker = Arc::new(RuleQueryWorker::new(items.clone(), client, metrics.clone()));

        let ctx = ExecutionContext::new("system", CancellationToken::new());
        let executor = Arc::new(GroupExecutor::new(
            explore,
            reports.clone(),
            items,
            task_configs.clone(),
            metadata.clone(),
            worker,
            LockGate::new(
                locks.clone(),
                Duration::from_secs(explore.report_lock_ttl_seconds),
            ),
            notifier.clone(),
            metrics.clone(),
            ctx.clone(),
        ));
        let splitter = Arc::new(TaskSplitter::new(
            task_configs,
            reports,
            metadata,
            locks,
            notifier,
            metrics,
            Duration::from_secs(explore.split_lock_ttl_seconds),
            explore.discovery_batch_size,
            explore.default_sample_size,
        ));

        info!(
            max_groups = explore.max_groups(),
            concurrency_task_limit = explore.concurrency_task_limit,
            "探查引擎装配完成"
        );

        Ok(Self {
            config,
            database,
            splitter,
            executor,
            ctx,
        })
    }

    /// 运行直至收到关闭信号，然后取消所有报告并等待其退出
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let explore = &self.config.explore;

        let split_handle = {
            let splitter = Arc::clone(&self.splitter);
            let ctx = self.ctx.clone();
            let interval = Duration::from_secs(explore.split_interval_seconds);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { run_split_loop(splitter, ctx, interval, shutdown_rx).await })
        };

        let discovery_handle = {
            let executor = Arc::clone(&self.executor);
            let interval = Duration::from_secs(explore.discovery_interval_seconds);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { run_discovery_loop(executor, interval, shutdown_rx).await })
        };

        let _ = shutdown_rx.recv().await;
        info!("探查引擎收到关闭信号");

        let _ = tokio::join!(split_handle, discovery_handle);

        let timeout = Duration::from_secs(explore.shutdown_timeout_seconds);
        if !self.executor.shutdown(timeout).await {
            warn!("部分报告未在超时内退出，其报告锁将自然过期");
        }
        self.ctx.cancel.cancel();
        self.database.close().await;

        info!("探查引擎已停止");
        Ok(())
    }
}

async fn run_split_loop(
    splitter: Arc<TaskSplitter>,
    ctx: ExecutionContext,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = splitter.run_once(&ctx).await {
                    error!("任务拆分失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("拆分循环收到关闭信号");
                break;
            }
        }
    }
}

async fn run_discovery_loop(
    executor: Arc<GroupExecutor>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = executor.discover_once().await {
                    error!("报告发现失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("发现循环收到关闭信号");
                break;
            }
        }
    }
}

/// 屏蔽连接串中的密码
fn mask_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}

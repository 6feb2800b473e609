use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use explorer_core::config::ExploreConfig;
use explorer_core::models::Report;
use explorer_core::traits::{
    MetadataResolver, ReportItemRepository, ReportRepository, TaskConfigRepository,
};
use explorer_core::{ExecutionContext, ExploreResult};
use explorer_infrastructure::MetricsCollector;
use explorer_worker::RuleQueryWorker;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::group_manager::{ActiveGuard, CoordinatorDeps, GroupManager};
use crate::lifecycle::LifecycleNotifier;
use crate::lock_gate::{report_lock_key, LockGate};

/// 一次准入尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 已获取分组名额与报告锁，协调任务已启动
    Admitted,
    /// 分组池已满，本轮发现到此为止
    Busy,
    /// 报告已在本进程执行
    AlreadyActive,
    /// 报告锁被其他进程持有，或报告已进入终态
    Conflict,
}

/// 分组执行器
///
/// 分组池限制同时执行的报告数（`concurrency_limit / concurrency_task_limit`），
/// 每个报告内部再由任务池限制同时执行的查询数，因此进程内在途查询总数
/// 不超过 `concurrency_limit`。
pub struct GroupExecutor {
    deps: Arc<CoordinatorDeps>,
    lock_gate: LockGate,
    group_pool: Arc<Semaphore>,
    active: Arc<Mutex<HashSet<String>>>,
    root: ExecutionContext,
    tracker: TaskTracker,
    task_limit: usize,
    poll_interval: Duration,
    batch_size: i64,
}

impl GroupExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &ExploreConfig,
        reports: Arc<dyn ReportRepository>,
        items: Arc<dyn ReportItemRepository>,
        task_configs: Arc<dyn TaskConfigRepository>,
        metadata: Arc<dyn MetadataResolver>,
        worker: Arc<RuleQueryWorker>,
        lock_gate: LockGate,
        notifier: Arc<LifecycleNotifier>,
        metrics: Arc<MetricsCollector>,
        root: ExecutionContext,
    ) -> Self {
        let deps = Arc::new(CoordinatorDeps {
            reports,
            items,
            task_configs,
            metadata,
            worker,
            notifier,
            metrics,
            in_flight: Arc::new(AtomicUsize::new(0)),
        });

        Self {
            deps,
            lock_gate,
            group_pool: Arc::new(Semaphore::new(config.max_groups())),
            active: Arc::new(Mutex::new(HashSet::new())),
            root,
            tracker: TaskTracker::new(),
            task_limit: config.concurrency_task_limit,
            poll_interval: Duration::from_millis(config.dispatch_poll_interval_ms),
            batch_size: config.discovery_batch_size,
        }
    }

    pub fn root_token(&self) -> CancellationToken {
        self.root.cancel.clone()
    }

    /// 当前在本进程执行的报告数
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 非阻塞准入：先占分组名额，再取报告锁
    pub async fn try_admit(&self, report: &Report) -> ExploreResult<Admission> {
        let Some(active) = ActiveGuard::register(&self.active, &report.code) else {
            return Ok(Admission::AlreadyActive);
        };

        let Ok(group_permit) = self.group_pool.clone().try_acquire_owned() else {
            return Ok(Admission::Busy);
        };

        let ctx = self.root.child();
        let key = report_lock_key(&report.code);
        let Some(lock) = self.lock_gate.try_lock(&key, ctx.cancel.clone()).await? else {
            debug!(report.code = %report.code, "报告锁已被其他进程持有，跳过");
            self.deps.metrics.record_conflict("report_lock");
            return Ok(Admission::Conflict);
        };

        // 取锁前报告可能已被其他进程执行完毕
        let current = match self.deps.reports.get_by_code(&report.code).await {
            Ok(current) => current,
            Err(e) => {
                lock.release().await;
                return Err(e);
            }
        };
        let Some(current) = current.filter(|r| !r.status.is_terminal()) else {
            lock.release().await;
            self.deps.metrics.record_conflict("report_finished");
            return Ok(Admission::Conflict);
        };

        let manager = GroupManager::new(
            current,
            ctx,
            self.root.clone(),
            self.task_limit,
            self.poll_interval,
            lock,
            group_permit,
            active,
        );
        debug!(report.code = %manager.code(), "报告已准入");

        let deps = self.deps.clone();
        let registry = self.active.clone();
        self.deps.metrics.set_active_groups(self.active_count());
        self.tracker.spawn(async move {
            let metrics = deps.metrics.clone();
            manager.run(deps).await;
            let remaining = registry.lock().unwrap_or_else(|e| e.into_inner()).len();
            metrics.set_active_groups(remaining);
        });

        Ok(Admission::Admitted)
    }

    /// 一轮发现：拉取 UNDONE / EXECUTING 报告并逐个尝试准入
    ///
    /// 分组池满时立即结束本轮，剩余报告留待下一轮。
    pub async fn discover_once(&self) -> ExploreResult<usize> {
        if self.root.is_cancelled() {
            return Ok(0);
        }

        let reports = self.deps.reports.get_runnable(self.batch_size).await?;
        let mut admitted = 0;
        for report in &reports {
            if self.root.is_cancelled() {
                break;
            }
            match self.try_admit(report).await {
                Ok(Admission::Admitted) => admitted += 1,
                Ok(Admission::Busy) => {
                    debug!("分组池已满，等待下一轮发现");
                    break;
                }
                Ok(Admission::AlreadyActive) | Ok(Admission::Conflict) => {}
                Err(e) => {
                    warn!(report.code = %report.code, error = %e, "报告准入失败");
                }
            }
        }

        if admitted > 0 {
            info!(admitted, candidates = reports.len(), "本轮发现准入 {} 个报告", admitted);
        }
        Ok(admitted)
    }

    /// 等待当前所有协调任务结束
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// 取消所有报告并等待协调任务退出；超时返回 false
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        info!(active = self.active_count(), "分组执行器开始关闭");
        self.root.cancel.cancel();
        self.tracker.close();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("分组执行器已关闭");
                true
            }
            Err(_) => {
                warn!(active = self.active_count(), "等待报告协调任务退出超时");
                false
            }
        }
    }
}

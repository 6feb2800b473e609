//! 任务拆分：把待执行的任务版本编译为报告与报告项

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use explorer_core::models::{Report, ReportItem, ReportStatus, TaskConfig, TaskExecStatus};
use explorer_core::traits::{
    DistributedLockService, MetadataResolver, ReportRepository, TaskConfigRepository,
};
use explorer_core::{ExecutionContext, ExploreError, ExploreResult};
use explorer_domain::{RuleCompiler, RuleSpec, ScoringAggregator, TableInfo};
use explorer_infrastructure::{ExploreTracer, MetricsCollector, StructuredLogger};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::lifecycle::LifecycleNotifier;
use crate::lock_gate::split_lock_key;

/// 单个任务版本的拆分结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitOutcome {
    /// 已创建待执行报告
    Created { code: String, item_count: usize },
    /// 没有需要查询的规则，报告已直接评分完成
    Finalized { code: String },
    /// 规则配置错误，报告以 FAILED 落库
    Failed { code: String, reason: String },
    /// 已被其他进程拆分或锁被占用
    Skipped,
}

/// 一轮拆分的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitStats {
    pub created: usize,
    pub finalized: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct TaskSplitter {
    task_configs: Arc<dyn TaskConfigRepository>,
    reports: Arc<dyn ReportRepository>,
    metadata: Arc<dyn MetadataResolver>,
    locks: Arc<dyn DistributedLockService>,
    notifier: Arc<LifecycleNotifier>,
    metrics: Arc<MetricsCollector>,
    lock_ttl: Duration,
    batch_size: i64,
    default_sample_size: i64,
}

impl TaskSplitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_configs: Arc<dyn TaskConfigRepository>,
        reports: Arc<dyn ReportRepository>,
        metadata: Arc<dyn MetadataResolver>,
        locks: Arc<dyn DistributedLockService>,
        notifier: Arc<LifecycleNotifier>,
        metrics: Arc<MetricsCollector>,
        lock_ttl: Duration,
        batch_size: i64,
        default_sample_size: i64,
    ) -> Self {
        Self {
            task_configs,
            reports,
            metadata,
            locks,
            notifier,
            metrics,
            lock_ttl,
            batch_size,
            default_sample_size,
        }
    }

    /// 拆分一批 UNDONE 任务；单个任务出错不影响其余任务
    pub async fn run_once(&self, ctx: &ExecutionContext) -> ExploreResult<SplitStats> {
        let tasks = self.task_configs.get_undone(self.batch_size).await?;
        let mut stats = SplitStats::default();

        for task in &tasks {
            if ctx.is_cancelled() {
                break;
            }
            let span = ExploreTracer::split_span(&task.task_id, task.version);
            match self.split_task(task).instrument(span).await {
                Ok(SplitOutcome::Created { .. }) => stats.created += 1,
                Ok(SplitOutcome::Finalized { .. }) => stats.finalized += 1,
                Ok(SplitOutcome::Failed { .. }) => stats.failed += 1,
                Ok(SplitOutcome::Skipped) => stats.skipped += 1,
                Err(e) => {
                    stats.errors += 1;
                    warn!(
                        task.id = %task.task_id,
                        task.version = task.version,
                        error = %e,
                        "任务拆分失败，下一轮重试"
                    );
                }
            }
        }

        if !tasks.is_empty() {
            info!(
                created = stats.created,
                finalized = stats.finalized,
                failed = stats.failed,
                skipped = stats.skipped,
                errors = stats.errors,
                "本轮任务拆分完成"
            );
        }
        Ok(stats)
    }

    /// 拆分单个任务版本
    ///
    /// 持有 `(task_id, version)` 的短期锁，并在锁内再次检查报告是否已存在。
    pub async fn split_task(&self, task: &TaskConfig) -> ExploreResult<SplitOutcome> {
        if self.reports.exists_for_version(&task.task_id, task.version).await? {
            self.mark_task(task, TaskExecStatus::Success, None).await?;
            self.metrics.record_conflict("already_split");
            return Ok(SplitOutcome::Skipped);
        }

        let key = split_lock_key(&task.task_id, task.version);
        let Some(lease) = self.locks.acquire(&key, self.lock_ttl).await? else {
            debug!(lock.key = %key, "拆分锁已被其他进程持有，跳过");
            self.metrics.record_conflict("split_lock");
            return Ok(SplitOutcome::Skipped);
        };

        let result = self.split_locked(task).await;

        if let Err(e) = self.locks.release(&lease).await {
            warn!(lock.key = %key, error = %e, "释放拆分锁失败，等待其自然过期");
        }
        result
    }

    async fn split_locked(&self, task: &TaskConfig) -> ExploreResult<SplitOutcome> {
        if self.reports.exists_for_version(&task.task_id, task.version).await? {
            self.mark_task(task, TaskExecStatus::Success, None).await?;
            return Ok(SplitOutcome::Skipped);
        }

        let started = Instant::now();
        let code = Uuid::new_v4().simple().to_string();

        let spec = match RuleSpec::parse(&task.rule_spec) {
            Ok(spec) => spec,
            Err(e) => return self.fail_task(task, code, e).await,
        };
        let columns = match self.metadata.resolve_columns(&task.table.table_id).await {
            Ok(columns) => columns,
            Err(e) if e.is_configuration() => return self.fail_task(task, code, e).await,
            Err(e) => return Err(e),
        };
        let table = TableInfo::from_task(task, self.default_sample_size);
        let compiled = match RuleCompiler::compile_task(&spec, &columns, &table) {
            Ok(compiled) => compiled,
            Err(e) if e.is_configuration() => return self.fail_task(task, code, e).await,
            Err(e) => return Err(e),
        };

        let query_count = compiled.query_count();
        let metadata_rules = compiled.metadata_rules.clone();
        let items = compiled.into_report_items(&code);
        let item_count = items.len();

        if items.is_empty() {
            let summary = ScoringAggregator::aggregate(&[], &metadata_rules, &columns)?;
            let mut report = Report::new(&code, &task.task_id, task.version, &task.operator);
            report.status = ReportStatus::Success;
            report.scores = summary.scores;
            report.total_row_count = summary.total_row_count;
            report.finished_at = Some(Utc::now());

            let Some(report) = self.create_report(task, &report, &[]).await? else {
                return Ok(SplitOutcome::Skipped);
            };
            self.mark_task(task, TaskExecStatus::Success, None).await?;
            self.notifier.on_finalized(&report).await;

            self.metrics.record_split(0, started.elapsed().as_secs_f64());
            StructuredLogger::log_task_split(&task.task_id, task.version, &code, 0, 0);
            return Ok(SplitOutcome::Finalized { code });
        }

        let report = Report::new(&code, &task.task_id, task.version, &task.operator);
        if self.create_report(task, &report, &items).await?.is_none() {
            return Ok(SplitOutcome::Skipped);
        }
        self.mark_task(task, TaskExecStatus::Success, None).await?;

        self.metrics
            .record_split(item_count, started.elapsed().as_secs_f64());
        StructuredLogger::log_task_split(&task.task_id, task.version, &code, item_count, query_count);
        Ok(SplitOutcome::Created { code, item_count })
    }

    /// 规则配置错误：报告直接以 FAILED 落库，任务标记失败
    async fn fail_task(
        &self,
        task: &TaskConfig,
        code: String,
        error: ExploreError,
    ) -> ExploreResult<SplitOutcome> {
        let reason = error.user_message();
        StructuredLogger::log_task_split_failed(&task.task_id, task.version, &reason);

        let mut report = Report::new(&code, &task.task_id, task.version, &task.operator);
        report.status = ReportStatus::Failed;
        report.reason = Some(reason.clone());
        report.finished_at = Some(Utc::now());

        let Some(report) = self.create_report(task, &report, &[]).await? else {
            return Ok(SplitOutcome::Skipped);
        };
        self.mark_task(task, TaskExecStatus::Failed, Some(&reason)).await?;
        self.notifier.on_finalized(&report).await;

        Ok(SplitOutcome::Failed { code, reason })
    }

    /// 报告已存在时返回 None
    async fn create_report(
        &self,
        task: &TaskConfig,
        report: &Report,
        items: &[ReportItem],
    ) -> ExploreResult<Option<Report>> {
        match self.reports.create_with_items(report, items).await {
            Ok(created) => Ok(Some(created)),
            Err(ExploreError::AlreadySplit { .. }) => {
                self.metrics.record_conflict("already_split");
                self.mark_task(task, TaskExecStatus::Success, None).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn mark_task(
        &self,
        task: &TaskConfig,
        status: TaskExecStatus,
        reason: Option<&str>,
    ) -> ExploreResult<()> {
        self.task_configs
            .update_exec_status(task.id, status, reason)
            .await
    }
}

//! 单个报告的运行时状态与协调流程
//!
//! 协调者按 SQL 对报告项分批，经任务池限流后派发给规则查询工作单元，
//! 等待所有在途查询结束后统一收尾：全部成功则评分并写入 SUCCESS，
//! 否则写入 FAILED / CANCELED；进程关闭时把未完成的报告项退回 UNDONE。

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use explorer_core::models::{
    ColumnMeta, ItemStatus, ItemUpdate, Report, ReportItem, ReportOutcome, ReportStatus, TableRef,
};
use explorer_core::traits::{
    MetadataResolver, ReportItemRepository, ReportRepository, TaskConfigRepository,
};
use explorer_core::{ExecutionContext, ExploreError, ExploreResult};
use explorer_domain::{RuleSpec, ScoringAggregator};
use explorer_infrastructure::{ExploreTracer, MetricsCollector, StructuredLogger};
use explorer_worker::{BatchOutcome, QueryBatch, RuleQueryWorker};
use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use crate::lifecycle::LifecycleNotifier;
use crate::lock_gate::HeldLock;

/// 报告失败原因中最多列出的错误条数
const MAX_REASON_ERRORS: usize = 3;

/// 协调者依赖的共享协作服务
pub struct CoordinatorDeps {
    pub reports: Arc<dyn ReportRepository>,
    pub items: Arc<dyn ReportItemRepository>,
    pub task_configs: Arc<dyn TaskConfigRepository>,
    pub metadata: Arc<dyn MetadataResolver>,
    pub worker: Arc<RuleQueryWorker>,
    pub notifier: Arc<LifecycleNotifier>,
    pub metrics: Arc<MetricsCollector>,
    pub in_flight: Arc<AtomicUsize>,
}

/// 协调结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorExit {
    /// 报告已写入终态
    Finalized(ReportStatus),
    /// 进程关闭，报告保持 EXECUTING 等待下一轮
    Interrupted,
}

/// 从进程内活跃报告表中注销
pub(crate) struct ActiveGuard {
    registry: Arc<Mutex<HashSet<String>>>,
    code: String,
}

impl ActiveGuard {
    /// 注册报告编码；已在本进程执行时返回 None
    pub(crate) fn register(registry: &Arc<Mutex<HashSet<String>>>, code: &str) -> Option<Self> {
        let mut active = registry.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(code.to_string()) {
            return None;
        }
        Some(Self {
            registry: registry.clone(),
            code: code.to_string(),
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.code);
    }
}

/// 一个正在执行的报告
///
/// 持有分组池名额、报告锁与本报告的任务池；所有退出路径都会先释放锁，
/// 再归还分组池名额。
pub struct GroupManager {
    report: Report,
    ctx: ExecutionContext,
    shutdown: ExecutionContext,
    task_pool: Arc<Semaphore>,
    poll_interval: Duration,
    lock: HeldLock,
    _group_permit: OwnedSemaphorePermit,
    _active: ActiveGuard,
}

impl GroupManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        report: Report,
        ctx: ExecutionContext,
        shutdown: ExecutionContext,
        task_limit: usize,
        poll_interval: Duration,
        lock: HeldLock,
        group_permit: OwnedSemaphorePermit,
        active: ActiveGuard,
    ) -> Self {
        Self {
            report,
            ctx,
            shutdown,
            task_pool: Arc::new(Semaphore::new(task_limit.max(1))),
            poll_interval,
            lock,
            _group_permit: group_permit,
            _active: active,
        }
    }

    pub fn code(&self) -> &str {
        &self.report.code
    }

    /// 执行报告直至终态或进程关闭；协调过程中的 panic 只影响本报告
    pub async fn run(self, deps: Arc<CoordinatorDeps>) -> CoordinatorExit {
        let started = Instant::now();
        let span = ExploreTracer::report_span(&self.report.code, &self.report.task_id);
        let code = self.report.code.clone();
        let task_id = self.report.task_id.clone();

        let exit = self.coordinate(&deps).instrument(span).await;

        if let CoordinatorExit::Finalized(status) = exit {
            let report = deps.reports.get_by_code(&code).await.ok().flatten();
            StructuredLogger::log_report_finished(
                &code,
                &task_id,
                status.as_str(),
                report.as_ref().and_then(|r| r.scores.total),
                started.elapsed().as_millis() as u64,
                report.as_ref().and_then(|r| r.reason.as_deref()),
            );
        } else {
            info!(report.code = %code, "进程关闭，报告执行中断，等待下一轮调度");
        }
        exit
    }

    async fn coordinate(self, deps: &CoordinatorDeps) -> CoordinatorExit {
        let GroupManager {
            report,
            ctx,
            shutdown,
            task_pool,
            poll_interval,
            lock,
            _group_permit,
            _active,
        } = self;
        let code = report.code.as_str();

        let result = AssertUnwindSafe(drive(
            deps,
            &report,
            &ctx,
            &shutdown,
            &task_pool,
            poll_interval,
            &lock,
        ))
        .catch_unwind()
        .await;

        let exit = match result {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => {
                error!(report.code = %code, error = %e, "报告执行失败");
                let status = if e.is_cancellation() {
                    ReportStatus::Canceled
                } else {
                    ReportStatus::Failed
                };
                abandon_unfinished(deps, code).await;
                finalize_failed(deps, code, status, e.user_message()).await
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(report.code = %code, panic = %message, "报告协调任务发生panic");
                abandon_unfinished(deps, code).await;
                finalize_failed(
                    deps,
                    code,
                    ReportStatus::Failed,
                    format!("报告执行过程中发生内部异常: {message}"),
                )
                .await
            }
        };

        // 终态写入后才释放锁，分组池名额随 GroupManager 一起归还
        lock.release().await;
        exit
    }
}

/// 报告执行主流程
async fn drive(
    deps: &CoordinatorDeps,
    report: &Report,
    ctx: &ExecutionContext,
    shutdown: &ExecutionContext,
    task_pool: &Arc<Semaphore>,
    poll_interval: Duration,
    lock: &HeldLock,
) -> ExploreResult<CoordinatorExit> {
    let code = report.code.as_str();
    if report.status == ReportStatus::Undone {
        deps.reports.update_status(code, ReportStatus::Executing).await?;
    }

    let task = deps
        .task_configs
        .get_by_version(&report.task_id, report.task_version)
        .await?
        .ok_or_else(|| ExploreError::TaskConfigNotFound {
            task_id: report.task_id.clone(),
            version: report.task_version,
        })?;

    let items = deps.items.list_by_code(code).await?;
    let previous_failures: Vec<&ReportItem> = items
        .iter()
        .filter(|item| matches!(item.status, ItemStatus::Failed | ItemStatus::Canceled))
        .collect();
    if !previous_failures.is_empty() {
        let reason = summarize_item_reasons(&previous_failures);
        return Ok(finalize_failed(deps, code, ReportStatus::Failed, reason).await);
    }

    let mut queue: VecDeque<QueryBatch> = group_by_sql(code, &items).into();
    StructuredLogger::log_report_admitted(code, &report.task_id, queue.len());

    let mut join = JoinSet::new();
    let mut running: HashMap<tokio::task::Id, Vec<i64>> = HashMap::new();
    let mut failures: Vec<ExploreError> = Vec::new();

    while !queue.is_empty() {
        if ctx.is_cancelled() {
            break;
        }
        match task_pool.clone().try_acquire_owned() {
            Ok(permit) => {
                let Some(batch) = queue.pop_front() else {
                    break;
                };
                let ids = batch.item_ids();
                let id = spawn_batch(&mut join, deps, &task.table, batch, ctx, permit);
                running.insert(id, ids);
            }
            Err(_) => {
                tokio::select! {
                    Some(joined) = join.join_next_with_id() => {
                        handle_joined(deps, joined, &mut running, &mut failures, ctx).await;
                    }
                    _ = ctx.cancel.cancelled() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        while let Some(joined) = join.try_join_next_with_id() {
            handle_joined(deps, joined, &mut running, &mut failures, ctx).await;
        }
    }

    if !queue.is_empty() {
        debug!(report.code = %code, abandoned = queue.len(), "报告已取消，停止派发剩余查询");
    }

    while let Some(joined) = join.join_next_with_id().await {
        handle_joined(deps, joined, &mut running, &mut failures, ctx).await;
    }

    if lock.is_lost() {
        StructuredLogger::log_lock_lost(code, lock.key());
        failures.insert(0, ExploreError::Lock(format!("报告锁 {} 已丢失", lock.key())));
    }

    if failures.is_empty() && shutdown.is_cancelled() {
        reset_unfinished(deps, code).await?;
        return Ok(CoordinatorExit::Interrupted);
    }

    if !failures.is_empty() {
        cancel_unfinished(deps, code).await?;
        let status = if failures.iter().all(ExploreError::is_cancellation) {
            ReportStatus::Canceled
        } else {
            ReportStatus::Failed
        };
        let reason = summarize_errors(&failures);
        return Ok(finalize_failed(deps, code, status, reason).await);
    }

    let items = deps.items.list_by_code(code).await?;
    let unfinished: Vec<&ReportItem> = items
        .iter()
        .filter(|item| item.status != ItemStatus::Success)
        .collect();
    if !unfinished.is_empty() {
        let reason = summarize_item_reasons(&unfinished);
        return Ok(finalize_failed(deps, code, ReportStatus::Failed, reason).await);
    }

    let spec = RuleSpec::parse(&task.rule_spec)?;
    let columns: HashMap<String, ColumnMeta> = if spec.metadata_rules.is_empty() {
        HashMap::new()
    } else {
        deps.metadata.resolve_columns(&task.table.table_id).await?
    };
    let summary = ScoringAggregator::aggregate(&items, &spec.metadata_rules, &columns)?;

    let report = deps
        .notifier
        .finalize(
            code,
            ReportOutcome::success(summary.scores, summary.total_row_count),
        )
        .await?;
    Ok(CoordinatorExit::Finalized(report.status))
}

fn spawn_batch(
    join: &mut JoinSet<BatchOutcome>,
    deps: &CoordinatorDeps,
    table: &TableRef,
    batch: QueryBatch,
    ctx: &ExecutionContext,
    permit: OwnedSemaphorePermit,
) -> tokio::task::Id {
    let worker = deps.worker.clone();
    let table = table.clone();
    let cancel = ctx.cancel.clone();
    let in_flight = deps.in_flight.clone();
    let metrics = deps.metrics.clone();

    metrics.set_in_flight_queries(in_flight.fetch_add(1, Ordering::SeqCst) + 1);
    let handle = join.spawn(async move {
        let _permit = permit;
        let outcome = worker.execute(&table, batch, cancel).await;
        metrics.set_in_flight_queries(in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1));
        outcome
    });
    handle.id()
}

async fn handle_joined(
    deps: &CoordinatorDeps,
    joined: Result<(tokio::task::Id, BatchOutcome), tokio::task::JoinError>,
    running: &mut HashMap<tokio::task::Id, Vec<i64>>,
    failures: &mut Vec<ExploreError>,
    ctx: &ExecutionContext,
) {
    match joined {
        Ok((id, outcome)) => {
            running.remove(&id);
            match outcome {
                BatchOutcome::Succeeded | BatchOutcome::Canceled => {}
                BatchOutcome::Failed(e) => {
                    if !ctx.is_cancelled() {
                        warn!(error = %e, "规则查询失败，取消报告内其余查询");
                    }
                    failures.push(e);
                    ctx.cancel.cancel();
                }
            }
        }
        Err(join_error) => {
            let ids = running.remove(&join_error.id()).unwrap_or_default();
            deps.in_flight.fetch_sub(1, Ordering::SeqCst);
            let error = if join_error.is_panic() {
                ExploreError::Internal("规则查询任务发生panic".to_string())
            } else {
                ExploreError::canceled("规则查询任务被中止")
            };
            let updates: Vec<ItemUpdate> = ids
                .iter()
                .map(|id| ItemUpdate::terminal(*id, ItemStatus::Failed, error.user_message()))
                .collect();
            if let Err(e) = deps.items.update_items(&updates).await {
                error!(error = %e, "写入异常退出的报告项状态失败");
            }
            failures.push(error);
            ctx.cancel.cancel();
        }
    }
}

/// 按编译后的 SQL 分批，保持首次出现的顺序；已终态的报告项跳过
pub fn group_by_sql(code: &str, items: &[ReportItem]) -> Vec<QueryBatch> {
    let mut batches: Vec<QueryBatch> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for item in items.iter().filter(|item| !item.status.is_terminal()) {
        match index.get(item.sql.as_str()) {
            Some(&position) => batches[position].items.push(item.clone()),
            None => {
                index.insert(item.sql.as_str(), batches.len());
                batches.push(QueryBatch {
                    code: code.to_string(),
                    sql: item.sql.clone(),
                    items: vec![item.clone()],
                });
            }
        }
    }
    batches
}

/// 致命错误后把所有未终态的报告项标记为已取消
async fn cancel_unfinished(deps: &CoordinatorDeps, code: &str) -> ExploreResult<()> {
    let updates: Vec<ItemUpdate> = deps
        .items
        .list_by_code(code)
        .await?
        .iter()
        .filter(|item| !item.status.is_terminal())
        .map(|item| {
            ItemUpdate::terminal(item.id, ItemStatus::Canceled, "同一报告中的其他规则查询失败，已取消")
        })
        .collect();
    deps.items.update_items(&updates).await
}

/// 协调异常退出时尽力把未终态的报告项标记为已取消
async fn abandon_unfinished(deps: &CoordinatorDeps, code: &str) {
    let result = async {
        let updates: Vec<ItemUpdate> = deps
            .items
            .list_by_code(code)
            .await?
            .iter()
            .filter(|item| !item.status.is_terminal())
            .map(|item| ItemUpdate::terminal(item.id, ItemStatus::Canceled, "报告执行异常终止，已取消"))
            .collect();
        deps.items.update_items(&updates).await
    }
    .await;
    if let Err(e) = result {
        error!(report.code = %code, error = %e, "取消未完成的报告项失败");
    }
}

/// 进程关闭时把执行中的报告项退回未执行
async fn reset_unfinished(deps: &CoordinatorDeps, code: &str) -> ExploreResult<()> {
    let updates: Vec<ItemUpdate> = deps
        .items
        .list_by_code(code)
        .await?
        .iter()
        .filter(|item| item.status == ItemStatus::Executing)
        .map(|item| ItemUpdate::reset(item.id))
        .collect();
    deps.items.update_items(&updates).await
}

async fn finalize_failed(
    deps: &CoordinatorDeps,
    code: &str,
    status: ReportStatus,
    reason: String,
) -> CoordinatorExit {
    let reason = if reason.trim().is_empty() {
        "报告执行失败".to_string()
    } else {
        reason
    };
    match deps
        .notifier
        .finalize(code, ReportOutcome::failed(status, reason))
        .await
    {
        Ok(report) => CoordinatorExit::Finalized(report.status),
        Err(e) => {
            error!(report.code = %code, error = %e, "写回报告终态失败");
            CoordinatorExit::Finalized(status)
        }
    }
}

fn summarize_errors(errors: &[ExploreError]) -> String {
    let mut messages: Vec<String> = Vec::new();
    for error in errors {
        let message = error.user_message();
        if !messages.contains(&message) {
            messages.push(message);
        }
    }
    join_reasons(messages)
}

fn summarize_item_reasons(items: &[&ReportItem]) -> String {
    let mut messages: Vec<String> = Vec::new();
    for item in items {
        let message = format!(
            "规则 {}: {}",
            item.rule_id,
            item.reason.as_deref().unwrap_or(item.status.as_str())
        );
        if !messages.contains(&message) {
            messages.push(message);
        }
    }
    join_reasons(messages)
}

fn join_reasons(messages: Vec<String>) -> String {
    let total = messages.len();
    let mut reason = messages
        .into_iter()
        .take(MAX_REASON_ERRORS)
        .collect::<Vec<_>>()
        .join("; ");
    if total > MAX_REASON_ERRORS {
        reason.push_str(&format!(" 等共 {total} 个错误"));
    }
    reason
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use explorer_core::models::{ItemStatus, ItemUpdate, ReportItem, Row, TableRef};
use explorer_core::traits::ReportItemRepository;
use explorer_core::{ExploreError, ExploreResult};
use explorer_domain::interpret;
use explorer_infrastructure::{ExploreTracer, MetricsCollector, StructuredLogger};
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use super::query_client::RetryingQueryClient;

/// 共享同一条编译后 SQL 的一组报告项
#[derive(Debug, Clone)]
pub struct QueryBatch {
    pub code: String,
    pub sql: String,
    pub items: Vec<ReportItem>,
}

impl QueryBatch {
    pub fn item_ids(&self) -> Vec<i64> {
        self.items.iter().map(|item| item.id).collect()
    }

    pub fn rule_ids(&self) -> Vec<String> {
        self.items.iter().map(|item| item.rule_id.clone()).collect()
    }
}

/// 单批查询的执行结果
#[derive(Debug)]
pub enum BatchOutcome {
    /// 全部报告项已写入 SUCCESS
    Succeeded,
    /// 报告项已写入 FAILED；错误需要上报给协调者
    Failed(ExploreError),
    /// 执行期间报告被取消，结果已丢弃，报告项状态由协调者收尾
    Canceled,
}

/// 规则查询工作单元：标记执行中、远程查询、解析结果、批量写回
pub struct RuleQueryWorker {
    items: Arc<dyn ReportItemRepository>,
    client: Arc<RetryingQueryClient>,
    metrics: Arc<MetricsCollector>,
}

impl RuleQueryWorker {
    pub fn new(
        items: Arc<dyn ReportItemRepository>,
        client: Arc<RetryingQueryClient>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            items,
            client,
            metrics,
        }
    }

    pub async fn execute(
        &self,
        table: &TableRef,
        batch: QueryBatch,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let span = ExploreTracer::rule_query_span(&batch.code, batch.items.len());
        self.run(table, batch, cancel).instrument(span).await
    }

    async fn run(&self, table: &TableRef, batch: QueryBatch, cancel: CancellationToken) -> BatchOutcome {
        if let Err(e) = self.items.mark_executing(&batch.item_ids(), Utc::now()).await {
            return BatchOutcome::Failed(e);
        }

        let started = Instant::now();
        let query = self
            .client
            .query_with_continuation(table, &batch.sql, &cancel)
            .await;

        if cancel.is_cancelled() {
            debug!(report.code = %batch.code, "报告已取消，丢弃查询结果");
            return BatchOutcome::Canceled;
        }

        match query {
            Ok(rows) => {
                self.metrics
                    .record_rule_query(batch.items.len(), started.elapsed().as_secs_f64());
                self.write_results(&batch, &rows).await
            }
            Err(e) if e.is_cancellation() => BatchOutcome::Canceled,
            Err(e) => {
                self.metrics.record_rule_query_failure(error_kind(&e));
                StructuredLogger::log_rule_query_failed(&batch.code, &batch.rule_ids(), &e.to_string());

                let reason = e.user_message();
                let updates: Vec<ItemUpdate> = batch
                    .items
                    .iter()
                    .map(|item| ItemUpdate::terminal(item.id, ItemStatus::Failed, reason.clone()))
                    .collect();
                match self.items.update_items(&updates).await {
                    Ok(()) => BatchOutcome::Failed(e),
                    Err(db) => BatchOutcome::Failed(db),
                }
            }
        }
    }

    async fn write_results(&self, batch: &QueryBatch, rows: &[Row]) -> BatchOutcome {
        let mut first_error: Option<ExploreError> = None;
        let mut updates = Vec::with_capacity(batch.items.len());

        for item in &batch.items {
            match interpret_item(item, rows) {
                Ok(result) => updates.push(ItemUpdate::success(item.id, result)),
                Err(e) => {
                    updates.push(ItemUpdate::terminal(
                        item.id,
                        ItemStatus::Failed,
                        e.user_message(),
                    ));
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Err(e) = self.items.update_items(&updates).await {
            return BatchOutcome::Failed(e);
        }

        match first_error {
            Some(e) => BatchOutcome::Failed(e),
            None => BatchOutcome::Succeeded,
        }
    }
}

fn interpret_item(item: &ReportItem, rows: &[Row]) -> ExploreResult<String> {
    interpret(item, rows)?.to_json()
}

fn error_kind(error: &ExploreError) -> &'static str {
    match error {
        ExploreError::Timeout(_) => "timeout",
        ExploreError::Network(_) => "network",
        ExploreError::QueryRejected(_) => "rejected",
        ExploreError::RemoteQuery(_) => "remote",
        _ => "other",
    }
}

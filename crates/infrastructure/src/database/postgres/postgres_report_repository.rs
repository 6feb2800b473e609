use async_trait::async_trait;
use explorer_core::models::{DimensionScores, Report, ReportItem, ReportOutcome, ReportStatus};
use explorer_core::traits::ReportRepository;
use explorer_core::{ExploreError, ExploreResult};
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};

use super::postgres_report_item_repository::PostgresReportItemRepository;

const REPORT_COLUMNS: &str = "id, code, task_id, task_version, status, is_latest, reason, \
     completeness, standardization, uniqueness, accuracy, consistency, total_score, \
     total_row_count, operator, created_at, finished_at";

pub struct PostgresReportRepository {
    pool: PgPool,
}

impl PostgresReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_report(row: &sqlx::postgres::PgRow) -> ExploreResult<Report> {
        let status: String = row.try_get("status")?;
        Ok(Report {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            task_id: row.try_get("task_id")?,
            task_version: row.try_get("task_version")?,
            status: ReportStatus::parse(&status)?,
            is_latest: row.try_get("is_latest")?,
            reason: row.try_get("reason")?,
            scores: DimensionScores {
                completeness: row.try_get("completeness")?,
                standardization: row.try_get("standardization")?,
                uniqueness: row.try_get("uniqueness")?,
                accuracy: row.try_get("accuracy")?,
                consistency: row.try_get("consistency")?,
                total: row.try_get("total_score")?,
            },
            total_row_count: row.try_get("total_row_count")?,
            operator: row.try_get("operator")?,
            created_at: row.try_get("created_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl ReportRepository for PostgresReportRepository {
    #[instrument(skip(self), fields(task.id = %task_id, task.version = version))]
    async fn exists_for_version(&self, task_id: &str, version: i32) -> ExploreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM explore_reports WHERE task_id = $1 AND task_version = $2)",
        )
        .bind(task_id)
        .bind(version)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ExploreError::database_error(format!("查询报告是否存在失败: {e}")))?;
        Ok(exists)
    }

    #[instrument(skip(self, report, items), fields(
        report.code = %report.code,
        task.id = %report.task_id,
        item_count = items.len(),
    ))]
    async fn create_with_items(
        &self,
        report: &Report,
        items: &[ReportItem],
    ) -> ExploreResult<Report> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ExploreError::database_error(format!("开启事务失败: {e}")))?;

        let sql = format!(
            "INSERT INTO explore_reports (code, task_id, task_version, status, is_latest, reason, \
             completeness, standardization, uniqueness, accuracy, consistency, total_score, \
             total_row_count, operator, created_at, finished_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {REPORT_COLUMNS}"
        );
        let scores = &report.scores;
        let row = sqlx::query(&sql)
            .bind(&report.code)
            .bind(&report.task_id)
            .bind(report.task_version)
            .bind(report.status.as_str())
            .bind(report.is_latest)
            .bind(report.reason.as_deref())
            .bind(scores.completeness)
            .bind(scores.standardization)
            .bind(scores.uniqueness)
            .bind(scores.accuracy)
            .bind(scores.consistency)
            .bind(scores.total)
            .bind(report.total_row_count)
            .bind(&report.operator)
            .bind(report.created_at)
            .bind(report.finished_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ExploreError::AlreadySplit {
                        task_id: report.task_id.clone(),
                        version: report.task_version,
                    }
                } else {
                    ExploreError::database_error(format!("创建报告失败: {e}"))
                }
            })?;

        for item in items {
            PostgresReportItemRepository::insert_in_tx(&mut tx, item).await?;
        }

        tx.commit()
            .await
            .map_err(|e| ExploreError::database_error(format!("提交报告创建事务失败: {e}")))?;

        let created = Self::row_to_report(&row)?;
        info!("报告 {} 创建成功，包含 {} 个报告项", created.code, items.len());
        Ok(created)
    }

    #[instrument(skip(self), fields(report.code = %code))]
    async fn get_by_code(&self, code: &str) -> ExploreResult<Option<Report>> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM explore_reports WHERE code = $1");
        let row = sqlx::query(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExploreError::database_error(format!("查询报告失败: {e}")))?;
        row.as_ref().map(Self::row_to_report).transpose()
    }

    #[instrument(skip(self))]
    async fn get_runnable(&self, limit: i64) -> ExploreResult<Vec<Report>> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM explore_reports \
             WHERE status IN ('UNDONE', 'EXECUTING') ORDER BY created_at ASC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExploreError::database_error(format!("查询可执行报告失败: {e}")))?;

        let reports = rows
            .iter()
            .map(Self::row_to_report)
            .collect::<ExploreResult<Vec<_>>>()?;
        debug!("查询到 {} 个可执行报告", reports.len());
        Ok(reports)
    }

    #[instrument(skip(self), fields(report.code = %code, status = %status))]
    async fn update_status(&self, code: &str, status: ReportStatus) -> ExploreResult<()> {
        let result = sqlx::query("UPDATE explore_reports SET status = $1 WHERE code = $2")
            .bind(status.as_str())
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(|e| ExploreError::database_error(format!("更新报告状态失败: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(ExploreError::report_not_found(code));
        }
        Ok(())
    }

    #[instrument(skip(self, outcome), fields(report.code = %code, status = %outcome.status))]
    async fn finalize(&self, code: &str, outcome: &ReportOutcome) -> ExploreResult<Report> {
        let sql = format!(
            "UPDATE explore_reports SET status = $1, reason = $2, completeness = $3, \
             standardization = $4, uniqueness = $5, accuracy = $6, consistency = $7, \
             total_score = $8, total_row_count = $9, finished_at = $10 \
             WHERE code = $11 RETURNING {REPORT_COLUMNS}"
        );
        let scores = &outcome.scores;
        let row = sqlx::query(&sql)
            .bind(outcome.status.as_str())
            .bind(&outcome.reason)
            .bind(scores.completeness)
            .bind(scores.standardization)
            .bind(scores.uniqueness)
            .bind(scores.accuracy)
            .bind(scores.consistency)
            .bind(scores.total)
            .bind(outcome.total_row_count)
            .bind(outcome.finished_at)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExploreError::database_error(format!("写回报告终态失败: {e}")))?
            .ok_or_else(|| ExploreError::report_not_found(code))?;

        Self::row_to_report(&row)
    }

    #[instrument(skip(self), fields(task.id = %task_id, report.code = %code))]
    async fn set_latest(&self, task_id: &str, code: &str) -> ExploreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ExploreError::database_error(format!("开启事务失败: {e}")))?;

        sqlx::query(
            "UPDATE explore_reports SET is_latest = FALSE WHERE task_id = $1 AND code <> $2 AND is_latest = TRUE",
        )
        .bind(task_id)
        .bind(code)
        .execute(&mut *tx)
        .await
        .map_err(|e| ExploreError::database_error(format!("清除最新报告标记失败: {e}")))?;

        let result = sqlx::query(
            "UPDATE explore_reports SET is_latest = TRUE WHERE task_id = $1 AND code = $2",
        )
        .bind(task_id)
        .bind(code)
        .execute(&mut *tx)
        .await
        .map_err(|e| ExploreError::database_error(format!("设置最新报告标记失败: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(ExploreError::report_not_found(code));
        }

        tx.commit()
            .await
            .map_err(|e| ExploreError::database_error(format!("提交最新报告标记失败: {e}")))?;
        debug!("报告 {} 标记为任务 {} 的最新报告", code, task_id);
        Ok(())
    }

    #[instrument(skip(self), fields(task.id = %task_id))]
    async fn list_by_task(&self, task_id: &str) -> ExploreResult<Vec<Report>> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM explore_reports WHERE task_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(task_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExploreError::database_error(format!("查询任务报告失败: {e}")))?;
        rows.iter().map(Self::row_to_report).collect()
    }
}

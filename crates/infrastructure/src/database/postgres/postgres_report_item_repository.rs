use async_trait::async_trait;
use chrono::{DateTime, Utc};
use explorer_core::models::{Dimension, ItemStatus, ItemUpdate, ReportItem, RuleLevel};
use explorer_core::traits::ReportItemRepository;
use explorer_core::{ExploreError, ExploreResult};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

const REPORT_ITEM_COLUMNS: &str = "id, code, field_id, column_name, rule_id, rule_name, rule_kind, \
     level, dimension, result_key, sql_text, status, result, reason, started_at, finished_at";

pub struct PostgresReportItemRepository {
    pool: PgPool,
}

impl PostgresReportItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_item(row: &sqlx::postgres::PgRow) -> ExploreResult<ReportItem> {
        let level: String = row.try_get("level")?;
        let dimension: Option<String> = row.try_get("dimension")?;
        let status: String = row.try_get("status")?;

        Ok(ReportItem {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            field_id: row.try_get("field_id")?,
            column: row.try_get("column_name")?,
            rule_id: row.try_get("rule_id")?,
            rule_name: row.try_get("rule_name")?,
            rule_kind: row.try_get("rule_kind")?,
            level: RuleLevel::parse(&level)?,
            dimension: dimension.as_deref().map(Dimension::parse).transpose()?,
            result_key: row.try_get("result_key")?,
            sql: row.try_get("sql_text")?,
            status: ItemStatus::parse(&status)?,
            result: row.try_get("result")?,
            reason: row.try_get("reason")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    /// 在报告创建事务内写入单个报告项
    pub(crate) async fn insert_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        item: &ReportItem,
    ) -> ExploreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO explore_report_items
                (code, field_id, column_name, rule_id, rule_name, rule_kind, level, dimension, result_key, sql_text, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&item.code)
        .bind(&item.field_id)
        .bind(&item.column)
        .bind(&item.rule_id)
        .bind(&item.rule_name)
        .bind(&item.rule_kind)
        .bind(item.level.as_str())
        .bind(item.dimension.map(|d| d.as_str()))
        .bind(&item.result_key)
        .bind(&item.sql)
        .bind(item.status.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| ExploreError::database_error(format!("写入报告项 {} 失败: {e}", item.rule_id)))?;
        Ok(())
    }
}

#[async_trait]
impl ReportItemRepository for PostgresReportItemRepository {
    #[instrument(skip(self), fields(report.code = %code))]
    async fn list_by_code(&self, code: &str) -> ExploreResult<Vec<ReportItem>> {
        let sql = format!(
            "SELECT {REPORT_ITEM_COLUMNS} FROM explore_report_items WHERE code = $1 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(code)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExploreError::database_error(format!("查询报告项失败: {e}")))?;

        rows.iter().map(Self::row_to_item).collect()
    }

    #[instrument(skip(self, ids), fields(item_count = ids.len()))]
    async fn mark_executing(&self, ids: &[i64], started_at: DateTime<Utc>) -> ExploreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "UPDATE explore_report_items SET status = 'EXECUTING', started_at = $1 WHERE id = ANY($2)",
        )
        .bind(started_at)
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(|e| ExploreError::database_error(format!("更新报告项为执行中失败: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self, updates), fields(item_count = updates.len()))]
    async fn update_items(&self, updates: &[ItemUpdate]) -> ExploreResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ExploreError::database_error(format!("开启事务失败: {e}")))?;

        for update in updates {
            sqlx::query(
                r#"
                UPDATE explore_report_items
                SET status = $1, result = $2, reason = $3,
                    started_at = CASE WHEN $1 = 'UNDONE' THEN NULL ELSE started_at END,
                    finished_at = CASE WHEN $1 = 'UNDONE' THEN NULL ELSE $4 END
                WHERE id = $5
                "#,
            )
            .bind(update.status.as_str())
            .bind(&update.result)
            .bind(&update.reason)
            .bind(update.finished_at)
            .bind(update.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ExploreError::database_error(format!("更新报告项 {} 失败: {e}", update.id)))?;
        }

        tx.commit()
            .await
            .map_err(|e| ExploreError::database_error(format!("提交报告项更新失败: {e}")))?;
        debug!("批量更新 {} 个报告项", updates.len());
        Ok(())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use explorer_core::models::{ExploreMode, TableRef, TaskConfig, TaskExecStatus, TimeRange};
use explorer_core::traits::TaskConfigRepository;
use explorer_core::{ExploreError, ExploreResult};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

const TASK_CONFIG_COLUMNS: &str = "id, task_id, version, is_latest_version, table_id, catalog_name, \
     database_name, table_name, rule_spec, exec_status, exec_reason, sample_size, explore_mode, \
     time_column, time_start, time_end, operator, deleted, created_at";

pub struct PostgresTaskConfigRepository {
    pool: PgPool,
}

impl PostgresTaskConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task_config(row: &sqlx::postgres::PgRow) -> ExploreResult<TaskConfig> {
        let exec_status: String = row.try_get("exec_status")?;
        let explore_mode: String = row.try_get("explore_mode")?;

        let time_column: Option<String> = row.try_get("time_column")?;
        let time_start: Option<DateTime<Utc>> = row.try_get("time_start")?;
        let time_end: Option<DateTime<Utc>> = row.try_get("time_end")?;
        let time_range = match (time_column, time_start, time_end) {
            (Some(column), Some(start), Some(end)) => Some(TimeRange { column, start, end }),
            _ => None,
        };

        Ok(TaskConfig {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            version: row.try_get("version")?,
            is_latest_version: row.try_get("is_latest_version")?,
            table: TableRef {
                table_id: row.try_get("table_id")?,
                catalog: row.try_get("catalog_name")?,
                database: row.try_get("database_name")?,
                table: row.try_get("table_name")?,
            },
            rule_spec: row.try_get("rule_spec")?,
            exec_status: TaskExecStatus::parse(&exec_status)?,
            exec_reason: row.try_get("exec_reason")?,
            sample_size: row.try_get("sample_size")?,
            explore_mode: ExploreMode::parse(&explore_mode)?,
            time_range,
            operator: row.try_get("operator")?,
            deleted: row.try_get("deleted")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl TaskConfigRepository for PostgresTaskConfigRepository {
    #[instrument(skip(self))]
    async fn get_undone(&self, limit: i64) -> ExploreResult<Vec<TaskConfig>> {
        let sql = format!(
            "SELECT {TASK_CONFIG_COLUMNS} FROM explore_task_configs \
             WHERE exec_status = 'UNDONE' AND deleted = FALSE \
             ORDER BY created_at ASC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ExploreError::database_error(format!("查询待拆分任务失败: {e}")))?;

        let tasks = rows
            .iter()
            .map(Self::row_to_task_config)
            .collect::<ExploreResult<Vec<_>>>()?;
        debug!("查询到 {} 个待拆分任务", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self), fields(task.id = %task_id, task.version = version))]
    async fn get_by_version(
        &self,
        task_id: &str,
        version: i32,
    ) -> ExploreResult<Option<TaskConfig>> {
        let sql = format!(
            "SELECT {TASK_CONFIG_COLUMNS} FROM explore_task_configs \
             WHERE task_id = $1 AND version = $2 AND deleted = FALSE"
        );
        let row = sqlx::query(&sql)
            .bind(task_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ExploreError::database_error(format!("查询任务版本失败: {e}")))?;

        row.as_ref().map(Self::row_to_task_config).transpose()
    }

    #[instrument(skip(self, reason), fields(task_config.id = id, status = %status.as_str()))]
    async fn update_exec_status(
        &self,
        id: i64,
        status: TaskExecStatus,
        reason: Option<&str>,
    ) -> ExploreResult<()> {
        let result = sqlx::query(
            "UPDATE explore_task_configs SET exec_status = $1, exec_reason = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ExploreError::database_error(format!("更新任务拆分状态失败: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(ExploreError::database_error(format!(
                "更新任务拆分状态失败: 任务配置 {id} 不存在"
            )));
        }
        debug!("任务配置 {} 拆分状态更新为 {}", id, status.as_str());
        Ok(())
    }
}

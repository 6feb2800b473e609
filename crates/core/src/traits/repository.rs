//! 持久化仓储接口
//!
//! 存储是唯一的事实来源，每一次状态迁移都必须写入仓储。
//! - `TaskConfigRepository` - 探查任务配置的读取与拆分状态
//! - `ReportRepository` - 报告的创建、终态写回与最新版本标记
//! - `ReportItemRepository` - 报告项（规则查询）的批量状态迁移

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::ExploreResult;
use crate::models::{
    ItemUpdate, Report, ReportItem, ReportOutcome, ReportStatus, TaskConfig, TaskExecStatus,
};

#[async_trait]
pub trait TaskConfigRepository: Send + Sync {
    /// 获取待拆分（UNDONE 且未删除）的任务配置，按创建时间排序
    async fn get_undone(&self, limit: i64) -> ExploreResult<Vec<TaskConfig>>;

    async fn get_by_version(&self, task_id: &str, version: i32)
        -> ExploreResult<Option<TaskConfig>>;

    async fn update_exec_status(
        &self,
        id: i64,
        status: TaskExecStatus,
        reason: Option<&str>,
    ) -> ExploreResult<()>;
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn exists_for_version(&self, task_id: &str, version: i32) -> ExploreResult<bool>;

    /// 在同一事务中写入报告及其全部报告项
    ///
    /// 若 (task_id, task_version) 已存在报告，返回 `AlreadySplit`。
    async fn create_with_items(
        &self,
        report: &Report,
        items: &[ReportItem],
    ) -> ExploreResult<Report>;

    async fn get_by_code(&self, code: &str) -> ExploreResult<Option<Report>>;

    /// 获取可执行（UNDONE / EXECUTING）的报告
    async fn get_runnable(&self, limit: i64) -> ExploreResult<Vec<Report>>;

    async fn update_status(&self, code: &str, status: ReportStatus) -> ExploreResult<()>;

    /// 写回终态、原因与各维度得分
    async fn finalize(&self, code: &str, outcome: &ReportOutcome) -> ExploreResult<Report>;

    /// 事务内清除该任务其余报告的最新标记，并将指定报告标记为最新
    async fn set_latest(&self, task_id: &str, code: &str) -> ExploreResult<()>;

    async fn list_by_task(&self, task_id: &str) -> ExploreResult<Vec<Report>>;
}

#[async_trait]
pub trait ReportItemRepository: Send + Sync {
    async fn list_by_code(&self, code: &str) -> ExploreResult<Vec<ReportItem>>;

    async fn mark_executing(&self, ids: &[i64], started_at: DateTime<Utc>) -> ExploreResult<()>;

    /// 同一条查询的报告项作为一批原子更新
    async fn update_items(&self, updates: &[ItemUpdate]) -> ExploreResult<()>;
}

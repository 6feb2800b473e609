use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ExploreError, ExploreResult};

/// 被探查的物理表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    /// 元数据服务中的表标识
    pub table_id: String,
    pub catalog: String,
    pub database: String,
    pub table: String,
}

impl TableRef {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.catalog, self.database, self.table)
    }
}

/// 任务配置的拆分状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskExecStatus {
    Undone,
    Success,
    Failed,
}

impl TaskExecStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskExecStatus::Undone => "UNDONE",
            TaskExecStatus::Success => "SUCCESS",
            TaskExecStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> ExploreResult<Self> {
        match value {
            "UNDONE" => Ok(TaskExecStatus::Undone),
            "SUCCESS" => Ok(TaskExecStatus::Success),
            "FAILED" => Ok(TaskExecStatus::Failed),
            other => Err(ExploreError::Internal(format!("未知的任务状态: {other}"))),
        }
    }
}

/// 探查模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExploreMode {
    /// 采样探查，附加 `LIMIT sample_size`
    Sample,
    /// 全表扫描
    Full,
    /// 仅探查时间窗口内的数据
    Timestamp,
}

impl ExploreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExploreMode::Sample => "sample",
            ExploreMode::Full => "full",
            ExploreMode::Timestamp => "timestamp",
        }
    }

    pub fn parse(value: &str) -> ExploreResult<Self> {
        match value {
            "sample" => Ok(ExploreMode::Sample),
            "full" => Ok(ExploreMode::Full),
            "timestamp" => Ok(ExploreMode::Timestamp),
            other => Err(ExploreError::Internal(format!("未知的探查模式: {other}"))),
        }
    }
}

/// Timestamp 模式下的时间窗口，左闭右开
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub column: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// 一个探查任务的某个版本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: i64,
    pub task_id: String,
    pub version: i32,
    pub is_latest_version: bool,
    pub table: TableRef,
    /// 规则配置 JSON
    pub rule_spec: String,
    pub exec_status: TaskExecStatus,
    pub exec_reason: Option<String>,
    pub sample_size: Option<i64>,
    pub explore_mode: ExploreMode,
    pub time_range: Option<TimeRange>,
    pub operator: String,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl TaskConfig {
    pub fn new(task_id: impl Into<String>, version: i32, table: TableRef, rule_spec: impl Into<String>) -> Self {
        Self {
            id: 0,
            task_id: task_id.into(),
            version,
            is_latest_version: true,
            table,
            rule_spec: rule_spec.into(),
            exec_status: TaskExecStatus::Undone,
            exec_reason: None,
            sample_size: None,
            explore_mode: ExploreMode::Sample,
            time_range: None,
            operator: "system".to_string(),
            deleted: false,
            created_at: Utc::now(),
        }
    }
}

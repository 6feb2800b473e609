use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{ExploreError, ExploreResult};

/// 报告状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Undone,
    Executing,
    Success,
    Canceled,
    Failed,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Undone => "UNDONE",
            ReportStatus::Executing => "EXECUTING",
            ReportStatus::Success => "SUCCESS",
            ReportStatus::Canceled => "CANCELED",
            ReportStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> ExploreResult<Self> {
        match value {
            "UNDONE" => Ok(ReportStatus::Undone),
            "EXECUTING" => Ok(ReportStatus::Executing),
            "SUCCESS" => Ok(ReportStatus::Success),
            "CANCELED" => Ok(ReportStatus::Canceled),
            "FAILED" => Ok(ReportStatus::Failed),
            other => Err(ExploreError::Internal(format!("未知的报告状态: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportStatus::Success | ReportStatus::Canceled | ReportStatus::Failed
        )
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 报告项（单条规则查询）状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Undone,
    Executing,
    Success,
    Failed,
    Canceled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Undone => "UNDONE",
            ItemStatus::Executing => "EXECUTING",
            ItemStatus::Success => "SUCCESS",
            ItemStatus::Failed => "FAILED",
            ItemStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(value: &str) -> ExploreResult<Self> {
        match value {
            "UNDONE" => Ok(ItemStatus::Undone),
            "EXECUTING" => Ok(ItemStatus::Executing),
            "SUCCESS" => Ok(ItemStatus::Success),
            "FAILED" => Ok(ItemStatus::Failed),
            "CANCELED" => Ok(ItemStatus::Canceled),
            other => Err(ExploreError::Internal(format!("未知的报告项状态: {other}"))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Success | ItemStatus::Failed | ItemStatus::Canceled
        )
    }
}

/// 质量维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Completeness,
    Standardization,
    Uniqueness,
    Accuracy,
    Consistency,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Completeness,
        Dimension::Standardization,
        Dimension::Uniqueness,
        Dimension::Accuracy,
        Dimension::Consistency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Completeness => "completeness",
            Dimension::Standardization => "standardization",
            Dimension::Uniqueness => "uniqueness",
            Dimension::Accuracy => "accuracy",
            Dimension::Consistency => "consistency",
        }
    }

    pub fn parse(value: &str) -> ExploreResult<Self> {
        Dimension::ALL
            .into_iter()
            .find(|dimension| dimension.as_str() == value)
            .ok_or_else(|| ExploreError::invalid_rule(format!("未知的质量维度: {value}")))
    }
}

/// 规则所属层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleLevel {
    Field,
    Row,
    View,
}

impl RuleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleLevel::Field => "field",
            RuleLevel::Row => "row",
            RuleLevel::View => "view",
        }
    }

    pub fn parse(value: &str) -> ExploreResult<Self> {
        match value {
            "field" => Ok(RuleLevel::Field),
            "row" => Ok(RuleLevel::Row),
            "view" => Ok(RuleLevel::View),
            other => Err(ExploreError::Internal(format!("未知的规则层级: {other}"))),
        }
    }
}

/// 各维度得分，未参与评分的维度为 None
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub completeness: Option<f64>,
    pub standardization: Option<f64>,
    pub uniqueness: Option<f64>,
    pub accuracy: Option<f64>,
    pub consistency: Option<f64>,
    pub total: Option<f64>,
}

impl DimensionScores {
    pub fn get(&self, dimension: Dimension) -> Option<f64> {
        match dimension {
            Dimension::Completeness => self.completeness,
            Dimension::Standardization => self.standardization,
            Dimension::Uniqueness => self.uniqueness,
            Dimension::Accuracy => self.accuracy,
            Dimension::Consistency => self.consistency,
        }
    }

    pub fn set(&mut self, dimension: Dimension, score: Option<f64>) {
        let slot = match dimension {
            Dimension::Completeness => &mut self.completeness,
            Dimension::Standardization => &mut self.standardization,
            Dimension::Uniqueness => &mut self.uniqueness,
            Dimension::Accuracy => &mut self.accuracy,
            Dimension::Consistency => &mut self.consistency,
        };
        *slot = score;
    }
}

/// 一次探查执行实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub code: String,
    pub task_id: String,
    pub task_version: i32,
    pub status: ReportStatus,
    pub is_latest: bool,
    pub reason: Option<String>,
    pub scores: DimensionScores,
    pub total_row_count: Option<i64>,
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Report {
    pub fn new(
        code: impl Into<String>,
        task_id: impl Into<String>,
        task_version: i32,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            code: code.into(),
            task_id: task_id.into(),
            task_version,
            status: ReportStatus::Undone,
            is_latest: false,
            reason: None,
            scores: DimensionScores::default(),
            total_row_count: None,
            operator: operator.into(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// 报告终态时写回的结果
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub status: ReportStatus,
    pub reason: Option<String>,
    pub scores: DimensionScores,
    pub total_row_count: Option<i64>,
    pub finished_at: DateTime<Utc>,
}

impl ReportOutcome {
    pub fn success(scores: DimensionScores, total_row_count: Option<i64>) -> Self {
        Self {
            status: ReportStatus::Success,
            reason: None,
            scores,
            total_row_count,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(status: ReportStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
            scores: DimensionScores::default(),
            total_row_count: None,
            finished_at: Utc::now(),
        }
    }
}

/// 单条规则的执行记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportItem {
    pub id: i64,
    pub code: String,
    pub field_id: Option<String>,
    pub column: Option<String>,
    pub rule_id: String,
    pub rule_name: String,
    /// 规则类型标签，如 `null_count`
    pub rule_kind: String,
    pub level: RuleLevel,
    pub dimension: Option<Dimension>,
    /// 合并查询结果中该规则对应列的前缀
    pub result_key: String,
    pub sql: String,
    pub status: ItemStatus,
    /// 解析后的规则结果 JSON
    pub result: Option<String>,
    pub reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 一批报告项的状态更新
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub id: i64,
    pub status: ItemStatus,
    pub result: Option<String>,
    pub reason: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl ItemUpdate {
    pub fn success(id: i64, result: String) -> Self {
        Self {
            id,
            status: ItemStatus::Success,
            result: Some(result),
            reason: None,
            finished_at: Utc::now(),
        }
    }

    /// 退回未执行状态，等待下一轮调度
    pub fn reset(id: i64) -> Self {
        Self {
            id,
            status: ItemStatus::Undone,
            result: None,
            reason: None,
            finished_at: Utc::now(),
        }
    }

    pub fn terminal(id: i64, status: ItemStatus, reason: impl Into<String>) -> Self {
        Self {
            id,
            status,
            result: None,
            reason: Some(reason.into()),
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_storage_names() {
        for status in [
            ReportStatus::Undone,
            ReportStatus::Executing,
            ReportStatus::Success,
            ReportStatus::Canceled,
            ReportStatus::Failed,
        ] {
            assert_eq!(ReportStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(ReportStatus::parse("RUNNING").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ReportStatus::Executing.is_terminal());
        assert!(ReportStatus::Canceled.is_terminal());
        assert!(!ItemStatus::Undone.is_terminal());
        assert!(ItemStatus::Failed.is_terminal());
    }

    #[test]
    fn test_dimension_scores_accessors() {
        let mut scores = DimensionScores::default();
        scores.set(Dimension::Accuracy, Some(0.5));
        assert_eq!(scores.get(Dimension::Accuracy), Some(0.5));
        assert_eq!(scores.get(Dimension::Uniqueness), None);
        assert_eq!(Dimension::parse("uniqueness").unwrap(), Dimension::Uniqueness);
    }
}

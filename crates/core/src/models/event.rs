use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::report::{Report, ReportStatus};

/// 报告进入终态后发布到消息总线的数据就绪通知
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFinishedEvent {
    pub code: String,
    pub task_id: String,
    pub task_version: i32,
    pub status: ReportStatus,
    pub total_score: Option<f64>,
    pub total_row_count: Option<i64>,
    pub finished_at: DateTime<Utc>,
}

impl ReportFinishedEvent {
    pub fn from_report(report: &Report) -> Self {
        Self {
            code: report.code.clone(),
            task_id: report.task_id.clone(),
            task_version: report.task_version,
            status: report.status,
            total_score: report.scores.total,
            total_row_count: report.total_row_count,
            finished_at: report.finished_at.unwrap_or_else(Utc::now),
        }
    }
}

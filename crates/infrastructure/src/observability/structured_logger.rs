//! Structured logging utilities
//!
//! 报告生命周期中的关键事件统一从这里输出，字段命名保持一致，
//! 便于按 `report.code`、`task.id` 检索。

use tracing::{error, info, warn};

/// Structured logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_location: bool,
    pub include_thread_id: bool,
    pub include_thread_name: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// 未知格式回退为 pretty
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_location: true,
            include_thread_id: false,
            include_thread_name: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, format: &str) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::parse(format),
            ..Default::default()
        }
    }
}

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log a task version split into a report
    pub fn log_task_split(task_id: &str, version: i32, code: &str, item_count: usize, query_count: usize) {
        info!(
            event = "task_split",
            task.id = task_id,
            task.version = version,
            report.code = code,
            report.item_count = item_count,
            report.query_count = query_count,
            "Task split into report"
        );
    }

    /// Log a task that failed to compile
    pub fn log_task_split_failed(task_id: &str, version: i32, reason: &str) {
        warn!(
            event = "task_split_failed",
            task.id = task_id,
            task.version = version,
            task.reason = reason,
            "Task rule configuration rejected"
        );
    }

    /// Log a report admitted into the group pool
    pub fn log_report_admitted(code: &str, task_id: &str, pending_queries: usize) {
        info!(
            event = "report_admitted",
            report.code = code,
            task.id = task_id,
            report.pending_queries = pending_queries,
            "Report admitted for execution"
        );
    }

    /// Log a report reaching its terminal status
    pub fn log_report_finished(
        code: &str,
        task_id: &str,
        status: &str,
        total_score: Option<f64>,
        duration_ms: u64,
        reason: Option<&str>,
    ) {
        if reason.is_none() {
            info!(
                event = "report_finished",
                report.code = code,
                task.id = task_id,
                report.status = status,
                report.total_score = total_score,
                report.duration_ms = duration_ms,
                "Report finished"
            );
        } else {
            error!(
                event = "report_finished",
                report.code = code,
                task.id = task_id,
                report.status = status,
                report.duration_ms = duration_ms,
                report.reason = reason.unwrap_or("unknown"),
                "Report finished without success"
            );
        }
    }

    /// Log a failed rule query batch
    pub fn log_rule_query_failed(code: &str, rule_ids: &[String], error: &str) {
        warn!(
            event = "rule_query_failed",
            report.code = code,
            rule.ids = ?rule_ids,
            error = error,
            "Rule query failed"
        );
    }

    /// Log a lost report lock
    pub fn log_lock_lost(code: &str, key: &str) {
        error!(
            event = "lock_lost",
            report.code = code,
            lock.key = key,
            "Report lock lost, cancelling execution"
        );
    }

    /// Log system errors
    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            component = component,
            operation = operation,
            error = %error,
            "System error occurred"
        );
    }
}

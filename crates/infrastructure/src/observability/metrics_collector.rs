//! Metrics collector for the exploration engine
//!
//! 基于 metrics crate 记录报告、规则查询与并发池指标，
//! 安装 Prometheus 导出器后即可对外暴露。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::{debug, warn};

/// Metrics collector for the exploration engine
pub struct MetricsCollector {
    // Split metrics
    tasks_split_total: Counter,
    split_duration: Histogram,

    // Rule query metrics
    rule_queries_total: Counter,
    rule_query_failures_total: Counter,
    query_retries_total: Counter,
    query_duration: Histogram,

    // Group pool metrics
    active_groups: Gauge,
    in_flight_queries: Gauge,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_split_total: counter!("explorer_tasks_split_total"),
            split_duration: histogram!("explorer_split_duration_seconds"),
            rule_queries_total: counter!("explorer_rule_queries_total"),
            rule_query_failures_total: counter!("explorer_rule_query_failures_total"),
            query_retries_total: counter!("explorer_query_retries_total"),
            query_duration: histogram!("explorer_query_duration_seconds"),
            active_groups: gauge!("explorer_active_groups"),
            in_flight_queries: gauge!("explorer_in_flight_queries"),
        }
    }

    /// Record a finished split (one report created)
    pub fn record_split(&self, item_count: usize, duration_seconds: f64) {
        self.tasks_split_total.increment(1);
        self.split_duration.record(duration_seconds);

        debug!(
            split.item_count = item_count,
            split.duration_seconds = duration_seconds,
            "Task split recorded"
        );
    }

    /// Record a report reaching a terminal status
    pub fn record_report_finished(&self, status: &str) {
        counter!("explorer_reports_finished_total", "status" => status.to_string()).increment(1);
    }

    /// Record one remote query execution covering `item_count` report items
    pub fn record_rule_query(&self, item_count: usize, duration_seconds: f64) {
        self.rule_queries_total.increment(1);
        self.query_duration.record(duration_seconds);
        counter!("explorer_report_items_executed_total").increment(item_count as u64);
    }

    pub fn record_rule_query_failure(&self, error_kind: &str) {
        self.rule_query_failures_total.increment(1);
        counter!("explorer_rule_query_failures_by_kind_total", "kind" => error_kind.to_string())
            .increment(1);

        warn!(error_kind = error_kind, "Rule query failed");
    }

    pub fn record_query_retry(&self, attempt: u32) {
        self.query_retries_total.increment(1);
        debug!(attempt = attempt, "Remote query retry scheduled");
    }

    /// Record a conflict (lock held elsewhere, report already split)
    pub fn record_conflict(&self, kind: &str) {
        counter!("explorer_conflicts_total", "kind" => kind.to_string()).increment(1);
    }

    pub fn set_active_groups(&self, count: usize) {
        self.active_groups.set(count as f64);
    }

    pub fn set_in_flight_queries(&self, count: usize) {
        self.in_flight_queries.set(count as f64);
    }
}

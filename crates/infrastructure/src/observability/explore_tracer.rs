//! Span builders for the report lifecycle

/// Tracing utilities for split / execution / rule query tracking
pub struct ExploreTracer;

impl ExploreTracer {
    /// Create a span for splitting one task version
    pub fn split_span(task_id: &str, version: i32) -> tracing::Span {
        tracing::info_span!("split_task", task.id = task_id, task.version = version)
    }

    /// Create a span for one report execution
    pub fn report_span(code: &str, task_id: &str) -> tracing::Span {
        tracing::info_span!("execute_report", report.code = code, task.id = task_id)
    }

    /// Create a span for one remote query batch
    pub fn rule_query_span(code: &str, item_count: usize) -> tracing::Span {
        tracing::info_span!(
            "rule_query",
            report.code = code,
            query.item_count = item_count,
            query.attempts = tracing::field::Empty
        )
    }
}

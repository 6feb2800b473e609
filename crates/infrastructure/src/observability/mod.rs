//! Observability module
//!
//! - Metrics collection and reporting
//! - Structured logging
//! - Span builders for the report lifecycle

pub mod explore_tracer;
pub mod metrics_collector;
pub mod structured_logger;
pub mod telemetry_setup;

pub use explore_tracer::ExploreTracer;
pub use metrics_collector::MetricsCollector;
pub use structured_logger::{LogFormat, LoggingConfig, StructuredLogger};
pub use telemetry_setup::{init_metrics, init_structured_logging};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_without_recorder() {
        let collector = MetricsCollector::new();
        collector.record_split(3, 0.02);
        collector.record_report_finished("SUCCESS");
        collector.record_rule_query(3, 1.5);
        collector.record_rule_query_failure("timeout");
        collector.record_query_retry(1);
        collector.record_conflict("report_lock");
        collector.set_active_groups(2);
        collector.set_in_flight_queries(5);
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("unknown"), LogFormat::Pretty);

        let config = LoggingConfig::new("debug", "json");
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_structured_logger_methods() {
        StructuredLogger::log_task_split("t1", 2, "code", 3, 1);
        StructuredLogger::log_report_finished("code", "t1", "FAILED", None, 10, Some("boom"));
        StructuredLogger::log_rule_query_failed("code", &["r1".to_string()], "timeout");

        let span = ExploreTracer::rule_query_span("code", 3);
        span.record("query.attempts", 2);
    }
}

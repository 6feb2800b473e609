use explorer_core::config::BackoffKind;
use explorer_core::AppConfig;

#[test]
fn test_shipped_config_file_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/explorer.toml");
    let config = AppConfig::load(Some(path)).unwrap();

    assert_eq!(config.explore.max_groups(), 4);
    assert_eq!(config.explore.query_retry.backoff, BackoffKind::Exponential);
    assert_eq!(config.message_queue.completion_topic, "explore_report_finished");
    assert!(config.observability.metrics_enabled);
}

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use explorer_core::config::{BackoffKind, QueryRetryConfig};
use explorer_core::models::{QueryPage, TableRef};
use explorer_core::traits::RemoteQueryService;
use explorer_core::{ExploreError, ExploreResult};
use explorer_worker::RetryingQueryClient;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// 按顺序返回预设结果的查询服务，并记录收到的续页 token
struct ScriptedQueryService {
    responses: Mutex<VecDeque<ExploreResult<QueryPage>>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl ScriptedQueryService {
    fn new(responses: Vec<ExploreResult<QueryPage>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            tokens: Mutex::new(Vec::new()),
        })
    }

    async fn calls(&self) -> Vec<Option<String>> {
        self.tokens.lock().await.clone()
    }
}

#[async_trait]
impl RemoteQueryService for ScriptedQueryService {
    async fn execute(
        &self,
        _table: &TableRef,
        _sql: &str,
        continuation_token: Option<&str>,
        _timeout: Duration,
    ) -> ExploreResult<QueryPage> {
        self.tokens
            .lock()
            .await
            .push(continuation_token.map(str::to_string));
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ExploreError::Internal("no scripted response".into())))
    }
}

fn table() -> TableRef {
    TableRef {
        table_id: "t1".into(),
        catalog: "hive".into(),
        database: "dw".into(),
        table: "users".into(),
    }
}

fn page(value: i64, next: Option<&str>) -> QueryPage {
    QueryPage {
        columns: vec!["v".into()],
        rows: vec![json!({ "v": value }).as_object().cloned().unwrap()],
        next_token: next.map(str::to_string),
    }
}

fn policy(max_attempts: u32) -> QueryRetryConfig {
    QueryRetryConfig {
        max_attempts,
        base_delay_ms: 10,
        max_delay_ms: 50,
        backoff: BackoffKind::Exponential,
        jitter: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_continuation_pages_are_accumulated() {
    let service = ScriptedQueryService::new(vec![
        Ok(page(1, Some("p2"))),
        Ok(page(2, Some("p3"))),
        Ok(page(3, None)),
    ]);
    let client = RetryingQueryClient::new(service.clone(), policy(3), Duration::from_secs(5));

    let rows = client
        .query_with_continuation(&table(), "SELECT v", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(
        service.calls().await,
        vec![None, Some("p2".to_string()), Some("p3".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_retried_per_page() {
    let service = ScriptedQueryService::new(vec![
        Ok(page(1, Some("p2"))),
        Err(ExploreError::RemoteQuery("502".into())),
        Err(ExploreError::Network("reset".into())),
        Ok(page(2, None)),
    ]);
    let client = RetryingQueryClient::new(service.clone(), policy(3), Duration::from_secs(5));

    let rows = client
        .query_with_continuation(&table(), "SELECT v", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    let calls = service.calls().await;
    assert_eq!(calls.len(), 4);
    assert!(calls[1..].iter().all(|t| t.as_deref() == Some("p2")));
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_surfaces_last_error() {
    let service = ScriptedQueryService::new(vec![
        Err(ExploreError::RemoteQuery("first".into())),
        Err(ExploreError::RemoteQuery("second".into())),
        Err(ExploreError::Timeout("third".into())),
    ]);
    let client = RetryingQueryClient::new(service.clone(), policy(3), Duration::from_secs(5));

    let err = client
        .query_with_continuation(&table(), "SELECT v", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ExploreError::Timeout(msg) if msg == "third"));
    assert_eq!(service.calls().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_query_is_not_retried() {
    let service = ScriptedQueryService::new(vec![
        Err(ExploreError::QueryRejected("syntax error".into())),
        Ok(page(1, None)),
    ]);
    let client = RetryingQueryClient::new(service.clone(), policy(5), Duration::from_secs(5));

    let err = client
        .query_with_continuation(&table(), "SELEC v", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ExploreError::QueryRejected(_)));
    assert_eq!(service.calls().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_retry_wait() {
    let service = ScriptedQueryService::new(vec![
        Err(ExploreError::RemoteQuery("busy".into())),
        Ok(page(1, None)),
    ]);
    let mut retry = policy(3);
    retry.base_delay_ms = 60_000;
    retry.max_delay_ms = 60_000;
    let client = RetryingQueryClient::new(service.clone(), retry, Duration::from_secs(5));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = client
        .query_with_continuation(&table(), "SELECT v", &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(service.calls().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_token_is_rejected() {
    let service = ScriptedQueryService::new(vec![
        Ok(page(1, Some("loop"))),
        Ok(page(2, Some("loop"))),
    ]);
    let client = RetryingQueryClient::new(service, policy(1), Duration::from_secs(5));

    let err = client
        .query_with_continuation(&table(), "SELECT v", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExploreError::RemoteQuery(_)));
}
